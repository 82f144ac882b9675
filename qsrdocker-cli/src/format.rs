// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! Flag-value parsers for `run`'s `-p`/`-e` repeatable flags. The
//! `-p [HIP:]HPORT:CPORT[/proto]` shape is small enough to split by hand
//! rather than pull in a grammar crate, matching the plainer flag types
//! elsewhere in this crate (`EnvPair` below needs no grammar either).

use std::str::FromStr;

use qsrdocker::models::PortBinding;

/// `-e KEY=VALUE`.
#[derive(Debug, Clone)]
pub struct EnvPair(pub String);

impl FromStr for EnvPair {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.split_once('=').is_none() {
            anyhow::bail!("invalid -e value {s:?}, expected KEY=VALUE");
        }
        Ok(EnvPair(s.to_string()))
    }
}

/// `-p [HOSTIP:]HOSTPORT:CONTAINERPORT[/PROTO]`. `PROTO` defaults to
/// `tcp`.
#[derive(Debug, Clone)]
pub struct PublishSpec {
    pub container_port: u16,
    pub proto: String,
    pub binding: PortBinding,
}

impl FromStr for PublishSpec {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, proto) = match s.rsplit_once('/') {
            Some((rest, proto)) => (rest, proto.to_ascii_lowercase()),
            None => (s, "tcp".to_string()),
        };
        if proto != "tcp" && proto != "udp" {
            anyhow::bail!("invalid protocol {proto:?} in publish spec {s:?}, expected tcp or udp");
        }

        let parts: Vec<&str> = rest.split(':').collect();
        let (host_ip, host_port, container_port) = match parts.as_slice() {
            [host_port, container_port] => ("0.0.0.0", *host_port, *container_port),
            [host_ip, host_port, container_port] => (*host_ip, *host_port, *container_port),
            _ => anyhow::bail!("invalid publish spec {s:?}, expected [HOSTIP:]HOSTPORT:CONTAINERPORT[/proto]"),
        };
        let host_port: u16 = host_port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid host port in publish spec {s:?}"))?;
        let container_port: u16 = container_port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid container port in publish spec {s:?}"))?;

        Ok(PublishSpec {
            container_port,
            proto,
            binding: PortBinding {
                host_ip: host_ip.to_string(),
                host_port,
            },
        })
    }
}

const GB: f64 = (1u64 << 30) as f64;
const MB: f64 = (1u64 << 20) as f64;
const KB: f64 = 1024.0;

/// Human-readable byte count, used by `image ls`'s size column.
pub fn format_capacity(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_host_ip() {
        let spec: PublishSpec = "18080:80".parse().unwrap();
        assert_eq!(spec.binding.host_ip, "0.0.0.0");
        assert_eq!(spec.binding.host_port, 18080);
        assert_eq!(spec.container_port, 80);
        assert_eq!(spec.proto, "tcp");
    }

    #[test]
    fn publish_with_host_ip_and_proto() {
        let spec: PublishSpec = "127.0.0.1:5353:53/udp".parse().unwrap();
        assert_eq!(spec.binding.host_ip, "127.0.0.1");
        assert_eq!(spec.binding.host_port, 5353);
        assert_eq!(spec.container_port, 53);
        assert_eq!(spec.proto, "udp");
    }

    #[test]
    fn rejects_bad_proto() {
        assert!("80:80/sctp".parse::<PublishSpec>().is_err());
    }

    #[test]
    fn env_pair_requires_equals() {
        assert!("FOO".parse::<EnvPair>().is_err());
        assert!("FOO=bar".parse::<EnvPair>().is_ok());
    }
}
