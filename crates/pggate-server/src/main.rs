#[tokio::main]
async fn main() {
    if let Err(e) = pggate_server::run(std::env::args().collect()).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
