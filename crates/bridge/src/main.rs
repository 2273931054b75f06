#[tokio::main]
async fn main() {
    let code = lib_bridge::init().await;
    std::process::exit(code);
}
