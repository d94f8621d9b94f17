pub mod agent;
pub mod clock;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod tools;
pub mod ui_stream;
