pub mod capture;
pub mod error;
pub mod frame;
pub mod network;
pub mod packet;
pub mod storage;
