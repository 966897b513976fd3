pub mod catalog;
pub mod codec;
pub mod config;
pub mod crs;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod index;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod region;
pub mod storage;
