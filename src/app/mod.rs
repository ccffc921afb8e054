mod browser;
mod capture;
mod crawl;
mod data_io;
mod error;
mod links;
mod pool;
mod results;
mod runtime;
#[cfg(test)]
mod testing;
mod tui;
mod types;
mod ui_utils;
mod webdriver;

pub use runtime::run;
