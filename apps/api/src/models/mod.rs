pub mod allocation;
pub mod cv;
pub mod notification;
pub mod project;
pub mod request;
pub mod skill;
pub mod user;
