pub mod app;
pub mod audio;
pub mod channels;
pub mod config;
pub mod engine;
pub mod frame_sync;
pub mod generator;
pub mod pool;
pub mod raster;
pub mod record;
pub mod render;
pub mod settings;
pub mod terminal;
pub mod trajectory;
