pub mod notification;
pub mod notify;
pub mod subscription;
pub mod target;
