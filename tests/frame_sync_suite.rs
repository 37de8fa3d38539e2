use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use twinklebrot::frame_sync::{SyncError, SyncState, frame_channel};

#[test]
fn consumer_that_never_releases_stalls_the_producer() {
    let (mut sync, consumer) = frame_channel(4, 4);
    let (tx, rx) = mpsc::channel();
    let producer = thread::spawn(move || {
        sync.render_frame(None, |r| r.clear((1, 1, 1))).unwrap();
        let result = sync.wait_consumed();
        let _ = tx.send(());
        result
    });

    let token = consumer
        .wait_ready(Duration::from_secs(2))
        .unwrap()
        .expect("frame should be announced");
    assert_eq!(token.frame(), 1);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    consumer.release(token).unwrap();
    rx.recv_timeout(Duration::from_secs(2)).expect("producer resumes after release");
    assert_eq!(producer.join().unwrap(), Ok(1));
}

#[test]
fn published_frame_is_intact_until_released() {
    let (mut sync, consumer) = frame_channel(2, 2);
    let producer = thread::spawn(move || {
        for n in 1..=20u8 {
            sync.render_frame(None, |r| r.clear((n, 0, 0))).unwrap();
            sync.wait_consumed().unwrap();
        }
        sync.frame()
    });

    let mut last = 0;
    for _ in 0..20 {
        let token = consumer
            .wait_ready(Duration::from_secs(2))
            .unwrap()
            .expect("frame");
        thread::sleep(Duration::from_millis(2));
        let red = consumer.capture(&token, |r| r.pixel(1, 1)).unwrap().map(|p| p.0);
        assert_eq!(red, Some(token.frame() as u8));
        assert!(token.frame() > last);
        last = token.frame();
        consumer.release(token).unwrap();
    }
    assert_eq!(producer.join().unwrap(), 20);
}

#[test]
fn interrupt_lets_the_producer_render_again() {
    let (mut sync, consumer) = frame_channel(2, 2);
    sync.render_frame(None, |_| {}).unwrap();
    consumer.interrupt();
    assert_eq!(sync.wait_consumed(), Err(SyncError::Interrupted));
    assert_eq!(sync.state(), SyncState::Rendering);

    sync.render_frame(None, |_| {}).unwrap();
    let token = consumer.try_ready().unwrap().expect("fresh notice");
    assert_eq!(token.frame(), 2);
    consumer.release(token).unwrap();
    assert_eq!(sync.wait_consumed(), Ok(2));
}

#[test]
fn dropping_the_consumer_unblocks_the_producer() {
    let (mut sync, consumer) = frame_channel(2, 2);
    sync.render_frame(None, |_| {}).unwrap();
    let handle = thread::spawn(move || sync.wait_consumed());
    thread::sleep(Duration::from_millis(20));
    drop(consumer);
    assert_eq!(handle.join().unwrap(), Err(SyncError::Disconnected));
}
