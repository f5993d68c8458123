// Attach to the first page on localhost:9222 and print document.title

use cdp_client::{CdpConnection, ClientConfig, DebugEndpoint, TargetSelector};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable tracing
    tracing_subscriber::fmt()
        .with_env_filter("cdp_client=debug")
        .init();

    let endpoint = DebugEndpoint::default();
    println!("Listing targets at {}...", endpoint.list_url());

    let target = endpoint.find_target(&TargetSelector::FirstPage).await?;
    println!("Attaching to {} ({})", target.title, target.url);

    let connection = CdpConnection::connect_to_target(&target, ClientConfig::default()).await?;
    let title = connection.evaluate("document.title", false).await?;

    println!("document.title = {:?}", title);

    Ok(())
}
