pub mod modules;
pub mod status;
pub mod subscribe;
pub mod update;
