pub mod bluetooth;
pub mod logging;
pub mod storage;
pub mod ticks;
