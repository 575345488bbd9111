//! Simple example of using rotating-proxies.
//!
//! Reads its settings from the environment, e.g.
//! `PROXY_MODE=0 PROXY_LIST=proxies.txt cargo run --example simple`.

use reqwest_middleware::ClientBuilder;
use rotating_proxies::{ProxyAssignment, ProxyPoolConfig, ProxyPoolMiddleware};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ProxyPoolConfig::from_env()?;
    println!("Initializing proxy pool in {} mode...", config.mode.as_str());

    let proxy_pool = ProxyPoolMiddleware::new(&config)?;
    let pool = proxy_pool.pool().clone();

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(proxy_pool)
        .build();

    for _ in 0..3 {
        let mut extensions = http::Extensions::new();
        let request = client.get("http://httpbin.org/ip").build()?;
        match client.execute_with_extensions(request, &mut extensions).await {
            Ok(response) => {
                let proxy = extensions
                    .get::<ProxyAssignment>()
                    .and_then(|a| a.proxy.clone())
                    .unwrap_or_default();
                println!("Status: {} via {}", response.status(), proxy);
                println!("Response: {}", response.text().await?);
            }
            Err(err) => println!("Request failed: {}", err),
        }
    }

    let (addresses, logins) = pool.get_stats();
    println!("{} proxies and {} logins left", addresses, logins);

    Ok(())
}
