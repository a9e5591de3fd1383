pub mod batch;
pub mod config;
pub mod freezer;
pub mod hygiene;
pub mod ir;
pub mod normalize;
pub mod pipeline;
pub mod placeholders;
pub mod progress;
pub mod providers;
pub mod quality;
pub mod report;
pub mod scenario;
pub mod sentinels;
pub mod table;
pub mod terminology;
