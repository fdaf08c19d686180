use std::net::{IpAddr, SocketAddr};
use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::info;

use stream_publisher::app::init_logging;
use stream_publisher::config::LoggingConfig;
use stream_publisher::mock_server::{MockServerConfig, MockVendorServer};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LoggingConfig::default());

    let matches = Command::new("mock-vendor-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Local stand-in for the streaming server admin API and the Graph API")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server listening port")
                .value_parser(clap::value_parser!(u16))
                .default_value("8080"),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .value_name("HOST")
                .help("Server listening host")
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::new("admin-password")
                .long("admin-password")
                .value_name("PASSWORD")
                .help("Password expected in the admin Basic auth header")
                .default_value("secret"),
        )
        .get_matches();

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let host: IpAddr = matches
        .get_one::<String>("host")
        .map(String::as_str)
        .unwrap_or("127.0.0.1")
        .parse()
        .context("Invalid host address")?;

    let mut config = MockServerConfig::default();
    if let Some(password) = matches.get_one::<String>("admin-password") {
        config.admin_password = password.clone();
    }

    info!(
        "Admin user {:?}, user token {:?}, page {:?}",
        config.admin_username,
        config.user_token,
        config.pages.iter().map(|page| page.id.as_str()).collect::<Vec<_>>()
    );
    info!("Point graph_url at http://{}:{}/graph and video_url at http://{}:{}/graph-video", host, port, host, port);

    let server = MockVendorServer::new(config);
    server.run(SocketAddr::new(host, port)).await?;
    Ok(())
}
