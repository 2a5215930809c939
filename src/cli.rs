use crate::{
    config::Config,
    error::{BridgeError, Result},
};

const USAGE: &str = "usage: wsbridge <listen-port> <upstream-host> <upstream-port>";

/// Parses the three required positional arguments.
///
/// `args` is expected to be `std::env::args()` including argv\[0\], matching
/// the original bridge's `argc`/`argv` convention.
pub fn parse_args(args: &[String]) -> Result<Config> {
    if args.len() < 4 {
        return Err(BridgeError::Usage(USAGE.to_string()));
    }

    let listen_port = args[1]
        .parse::<u16>()
        .map_err(|_| BridgeError::Usage(format!("'{}' is not a valid port", args[1])))?;
    let upstream_host = args[2].clone();
    let upstream_port = args[3]
        .parse::<u16>()
        .map_err(|_| BridgeError::Usage(format!("'{}' is not a valid port", args[3])))?;

    Ok(Config {
        listen_port,
        upstream_host,
        upstream_port,
    })
}
