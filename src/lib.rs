pub mod config;
pub mod error;
pub mod lifecycle;

pub mod db {
    pub mod memory;
    pub mod models;
    pub mod repository;
    pub mod unit_of_work;
}

pub mod storage {
    pub mod client;
    pub mod memory;
}

#[cfg(feature = "server")]
pub mod api {
    pub mod caller;
    pub mod documents;
    pub mod errors;
}

#[cfg(feature = "server")]
pub mod app;
