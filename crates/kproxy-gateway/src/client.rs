use std::sync::OnceLock;

static CLIENT: OnceLock<wreq::Client> = OnceLock::new();

/// Process-wide HTTP client, built once and cloned per call.
pub fn shared_client() -> wreq::Client {
    CLIENT.get_or_init(wreq::Client::new).clone()
}
