use clap::Parser;

use kproxy_gateway::transport::DEFAULT_BASE_URL;

#[derive(Parser, Debug)]
#[command(
    name = "kproxy",
    version,
    about = "Credential-rotating OpenAI-compatible gateway"
)]
pub struct Cli {
    #[arg(long, env = "KPROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "KPROXY_PORT", default_value_t = 8989)]
    pub port: u16,

    /// Default machine fingerprint, used when a request does not supply its
    /// own via the x-machine-id header.
    #[arg(long, env = "KPROXY_MACHINE_ID")]
    pub machine_id: Option<String>,

    #[arg(long, env = "KPROXY_UPSTREAM_URL", default_value = DEFAULT_BASE_URL)]
    pub upstream_url: String,
}
