use std::net::Ipv6Addr;

use derive_getters::Getters;

pub type Port = u16;

pub fn default_ssh_port() -> Port {
    22
}

/// One remote endpoint. `index` is the position of the host in the loaded
/// target list and is the primary sort key of the report.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    index: usize,
    address: String,
}

impl Target {
    pub fn new<S: AsRef<str>>(index: usize, address: S) -> Self {
        Self {
            index,
            address: normalize_address(address.as_ref()),
        }
    }

    /// Split the address into host and port, dropping the brackets around an
    /// IPv6 host. Falls back to the default port when the part after the last
    /// `:` isn't a port number.
    pub fn host_and_port(&self) -> (&str, Port) {
        match self.address.rsplit_once(':') {
            Some((host, port)) => match port.parse::<Port>() {
                Ok(port) => (host.trim_start_matches('[').trim_end_matches(']'), port),
                Err(_) => (self.address.as_str(), default_ssh_port()),
            },
            None => (self.address.as_str(), default_ssh_port()),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

/// Trim a host line and append the default SSH port when it has none. A bare
/// IPv6 address is bracketed first, `::1` becomes `[::1]:22`.
pub fn normalize_address(line: &str) -> String {
    let line = line.trim();
    if line.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", line, default_ssh_port())
    } else if line.contains(':') {
        line.to_string()
    } else {
        format!("{}:{}", line, default_ssh_port())
    }
}
