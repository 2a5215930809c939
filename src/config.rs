/// Runtime configuration, entirely derived from the three required CLI
/// positionals (see [`crate::cli::parse_args`]). This bridge has no config
/// file and no environment variables of its own.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub upstream_host: String,
    pub upstream_port: u16,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.listen_port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }
}
