mod classifier;
mod cli;
mod config;
mod deploy;
mod error;
mod extractors;
mod file_handler;
mod logging;
mod markers;
mod optimizer;
mod patterns;
mod reactivator;
mod rewriter;
mod runner;
mod scraper;

#[tokio::main]
async fn main() {
    cli::entry().await;
}
