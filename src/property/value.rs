//! Value encodings for the RPC surface and the
//! network/ulimit grammars.

use std::collections::BTreeMap;
use std::fmt;

/// Failure to parse a property value from its textual encoding.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("not a boolean (expected true/false): {0}")]
    Bool(String),
    #[error("not an integer: {0}")]
    Int(String),
    #[error("not a size: {0}")]
    Size(String),
    #[error("not a cpu value: {0}")]
    Cpu(String),
    #[error("malformed map entry: {0}")]
    MapEntry(String),
    #[error("unknown ulimit resource: {0}")]
    UlimitName(String),
    #[error("malformed ulimit bound: {0}")]
    UlimitBound(String),
    #[error("net priority out of range [0,7]: {0}")]
    Priority(u32),
    #[error("unknown net verb: {0}")]
    NetVerb(String),
    #[error("malformed net spec line: {0}")]
    NetSpec(String),
    #[error("{0}")]
    Other(String),
}

pub fn parse_bool(text: &str) -> Result<bool, ParseError> {
    match text.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ParseError::Bool(other.to_string())),
    }
}

pub fn format_bool(value: bool) -> String {
    if value { "true".to_string() } else { "false".to_string() }
}

/// Parses a byte count. Accepts a bare decimal (raw bytes, the canonical
/// output form) or a decimal with a `K`/`M`/`G`/`T` (optionally `Ki`/`Mi`/
/// `Gi`/`Ti`/`B`) suffix, base 1024, the usual
/// `ParseSize` convenience units.
pub fn parse_size(text: &str) -> Result<u64, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Size(text.to_string()));
    }
    let (digits, suffix) = match text.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => text.split_at(idx),
        None => (text, ""),
    };
    let value: f64 = digits.parse().map_err(|_| ParseError::Size(text.to_string()))?;
    let multiplier: f64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "ki" | "kib" => 1024.0,
        "m" | "mi" | "mib" => 1024.0 * 1024.0,
        "g" | "gi" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "t" | "ti" | "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(ParseError::Size(text.to_string())),
    };
    Ok((value * multiplier).round() as u64)
}

pub fn format_size(bytes: u64) -> String {
    bytes.to_string()
}

/// A cpu quantity, always stored internally in fractional cores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuValue(pub f64);

/// Parses `<float>c` (cores) or `<float>` (percent of one core, i.e. `100`
/// == 1 core).
pub fn parse_cpu(text: &str) -> Result<CpuValue, ParseError> {
    let text = text.trim();
    if let Some(prefix) = text.strip_suffix('c').or_else(|| text.strip_suffix('C')) {
        let cores: f64 = prefix.trim().parse().map_err(|_| ParseError::Cpu(text.to_string()))?;
        if cores < 0.0 {
            return Err(ParseError::Cpu(text.to_string()));
        }
        Ok(CpuValue(cores))
    } else {
        let percent: f64 = text.parse().map_err(|_| ParseError::Cpu(text.to_string()))?;
        if percent < 0.0 {
            return Err(ParseError::Cpu(text.to_string()));
        }
        Ok(CpuValue(percent / 100.0))
    }
}

/// Canonical output form is always `<cores>c`.
pub fn format_cpu(cores: f64) -> String {
    format!("{cores}c")
}

/// Splits `key: value; key: value; ...` into an ordered map, preserving
/// first-seen key order.
pub fn parse_map(text: &str) -> Result<Vec<(String, String)>, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (key, value) = entry
                .split_once(':')
                .ok_or_else(|| ParseError::MapEntry(entry.to_string()))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn format_map<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    entries
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Splits a `;`-separated list, trimming whitespace around each item.
pub fn parse_list(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn format_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join("; ")
}

/// The closed set of ulimit resource names accepted by the `ulimit`
/// property.
pub const ULIMIT_NAMES: &[&str] = &[
    "as", "core", "cpu", "data", "fsize", "locks", "memlock", "msgqueue", "nice", "nofile",
    "nproc", "rss", "rtprio", "rttime", "sigpending", "stack",
];

/// `None` means the sentinel `unlim`/`unlimited` (infinity).
pub type UlimitBound = Option<u64>;

pub fn parse_ulimit_bound(text: &str) -> Result<UlimitBound, ParseError> {
    match text.trim() {
        "unlim" | "unlimited" => Ok(None),
        other => other
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ParseError::UlimitBound(other.to_string())),
    }
}

pub fn format_ulimit_bound(bound: UlimitBound) -> String {
    match bound {
        None => "unlim".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Whole-set-replace ulimit map: resource name -> (soft, hard).
pub fn parse_ulimits(text: &str) -> Result<BTreeMap<String, (UlimitBound, UlimitBound)>, ParseError> {
    let mut out = BTreeMap::new();
    for entry in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, bounds) = entry
            .split_once(':')
            .ok_or_else(|| ParseError::UlimitBound(entry.to_string()))?;
        let name = name.trim();
        if !ULIMIT_NAMES.contains(&name) {
            return Err(ParseError::UlimitName(name.to_string()));
        }
        let mut parts = bounds.split_whitespace();
        let soft = parts
            .next()
            .ok_or_else(|| ParseError::UlimitBound(entry.to_string()))?;
        let hard = parts
            .next()
            .ok_or_else(|| ParseError::UlimitBound(entry.to_string()))?;
        if parts.next().is_some() {
            return Err(ParseError::UlimitBound(entry.to_string()));
        }
        out.insert(name.to_string(), (parse_ulimit_bound(soft)?, parse_ulimit_bound(hard)?));
    }
    Ok(out)
}

pub fn format_ulimits(ulimits: &BTreeMap<String, (UlimitBound, UlimitBound)>) -> String {
    ulimits
        .iter()
        .map(|(name, (soft, hard))| {
            format!("{name}: {} {}", format_ulimit_bound(*soft), format_ulimit_bound(*hard))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// A parsed line of the `net` property grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetSpecLine {
    None,
    Inherited,
    Host { iface: Option<String> },
    Container { name: String },
    Macvlan { master: String, name: String, mode: Option<String>, mtu: Option<u32>, hw: bool },
    Ipvlan { master: String, name: String, mode: Option<String>, mtu: Option<u32> },
    Veth { name: String, bridge: String, mtu: Option<u32>, hw: bool },
    L3 { name: String, master: Option<String> },
    Nat { name: Option<String> },
    Mtu { name: String, mtu: u32 },
    Autoconf { name: String },
    Netns { name: String },
}

impl fmt::Display for NetSpecLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetSpecLine::None => write!(f, "none"),
            NetSpecLine::Inherited => write!(f, "inherited"),
            NetSpecLine::Host { iface: None } => write!(f, "host"),
            NetSpecLine::Host { iface: Some(i) } => write!(f, "host {i}"),
            NetSpecLine::Container { name } => write!(f, "container {name}"),
            NetSpecLine::Macvlan { master, name, mode, mtu, hw } => {
                write!(f, "macvlan {master} {name}")?;
                if let Some(mode) = mode {
                    write!(f, " {mode}")?;
                }
                if let Some(mtu) = mtu {
                    write!(f, " {mtu}")?;
                }
                if *hw {
                    write!(f, " hw")?;
                }
                Ok(())
            }
            NetSpecLine::Ipvlan { master, name, mode, mtu } => {
                write!(f, "ipvlan {master} {name}")?;
                if let Some(mode) = mode {
                    write!(f, " {mode}")?;
                }
                if let Some(mtu) = mtu {
                    write!(f, " {mtu}")?;
                }
                Ok(())
            }
            NetSpecLine::Veth { name, bridge, mtu, hw } => {
                write!(f, "veth {name} {bridge}")?;
                if let Some(mtu) = mtu {
                    write!(f, " {mtu}")?;
                }
                if *hw {
                    write!(f, " hw")?;
                }
                Ok(())
            }
            NetSpecLine::L3 { name, master } => {
                write!(f, "L3 {name}")?;
                if let Some(master) = master {
                    write!(f, " {master}")?;
                }
                Ok(())
            }
            NetSpecLine::Nat { name: None } => write!(f, "NAT"),
            NetSpecLine::Nat { name: Some(n) } => write!(f, "NAT {n}"),
            NetSpecLine::Mtu { name, mtu } => write!(f, "MTU {name} {mtu}"),
            NetSpecLine::Autoconf { name } => write!(f, "autoconf {name}"),
            NetSpecLine::Netns { name } => write!(f, "netns {name}"),
        }
    }
}

fn parse_net_line(line: &str) -> Result<NetSpecLine, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let verb = *tokens.first().ok_or_else(|| ParseError::NetSpec(line.to_string()))?;
    let rest = &tokens[1..];
    match verb {
        "none" if rest.is_empty() => Ok(NetSpecLine::None),
        "inherited" if rest.is_empty() => Ok(NetSpecLine::Inherited),
        "host" if rest.is_empty() => Ok(NetSpecLine::Host { iface: None }),
        "host" if rest.len() == 1 => Ok(NetSpecLine::Host { iface: Some(rest[0].to_string()) }),
        "container" if rest.len() == 1 => Ok(NetSpecLine::Container { name: rest[0].to_string() }),
        "macvlan" if (2..=4).contains(&rest.len()) => {
            let master = rest[0].to_string();
            let name = rest[1].to_string();
            let mut mode = None;
            let mut mtu = None;
            let mut hw = false;
            for tok in &rest[2..] {
                if *tok == "hw" {
                    hw = true;
                } else if let Ok(m) = tok.parse::<u32>() {
                    mtu = Some(m);
                } else {
                    mode = Some(tok.to_string());
                }
            }
            Ok(NetSpecLine::Macvlan { master, name, mode, mtu, hw })
        }
        "ipvlan" if (2..=4).contains(&rest.len()) => {
            let master = rest[0].to_string();
            let name = rest[1].to_string();
            let mut mode = None;
            let mut mtu = None;
            for tok in &rest[2..] {
                if let Ok(m) = tok.parse::<u32>() {
                    mtu = Some(m);
                } else {
                    mode = Some(tok.to_string());
                }
            }
            Ok(NetSpecLine::Ipvlan { master, name, mode, mtu })
        }
        "veth" if (2..=4).contains(&rest.len()) => {
            let name = rest[0].to_string();
            let bridge = rest[1].to_string();
            let mut mtu = None;
            let mut hw = false;
            for tok in &rest[2..] {
                if *tok == "hw" {
                    hw = true;
                } else if let Ok(m) = tok.parse::<u32>() {
                    mtu = Some(m);
                } else {
                    return Err(ParseError::NetSpec(line.to_string()));
                }
            }
            Ok(NetSpecLine::Veth { name, bridge, mtu, hw })
        }
        "L3" if (1..=2).contains(&rest.len()) => Ok(NetSpecLine::L3 {
            name: rest[0].to_string(),
            master: rest.get(1).map(|s| s.to_string()),
        }),
        "NAT" if rest.len() <= 1 => Ok(NetSpecLine::Nat { name: rest.first().map(|s| s.to_string()) }),
        "MTU" if rest.len() == 2 => Ok(NetSpecLine::Mtu {
            name: rest[0].to_string(),
            mtu: rest[1].parse().map_err(|_| ParseError::NetSpec(line.to_string()))?,
        }),
        "autoconf" if rest.len() == 1 => Ok(NetSpecLine::Autoconf { name: rest[0].to_string() }),
        "netns" if rest.len() == 1 => Ok(NetSpecLine::Netns { name: rest[0].to_string() }),
        _ => Err(ParseError::NetSpec(line.to_string())),
    }
}

/// Parses the whole `net` property value: semicolon-separated lines, each
/// Purely syntactic — physical
/// creation happens elsewhere, during container start.
pub fn parse_net_spec(text: &str) -> Result<Vec<NetSpecLine>, ParseError> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_net_line)
        .collect()
}

pub fn format_net_spec(lines: &[NetSpecLine]) -> String {
    lines.iter().map(|l| l.to_string()).collect::<Vec<_>>().join("; ")
}

/// Validates a net priority is within `[0,7]`.
pub fn parse_net_priority(text: &str) -> Result<u32, ParseError> {
    let value: u32 = text.trim().parse().map_err(|_| ParseError::Int(text.to_string()))?;
    if value > 7 {
        return Err(ParseError::Priority(value));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parses_plain_decimal() {
        assert_eq!(parse_size("1048576").unwrap(), 1_048_576);
    }

    #[test]
    fn size_parses_gib_suffix() {
        assert_eq!(parse_size("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn size_round_trips_through_format() {
        let bytes = parse_size("100MiB").unwrap();
        let formatted = format_size(bytes);
        assert_eq!(parse_size(&formatted).unwrap(), bytes);
    }

    #[test]
    fn cpu_parses_cores_and_percent() {
        assert_eq!(parse_cpu("1.5c").unwrap().0, 1.5);
        assert_eq!(parse_cpu("50").unwrap().0, 0.5);
    }

    #[test]
    fn cpu_format_round_trips() {
        let v = parse_cpu("200").unwrap();
        assert_eq!(parse_cpu(&format_cpu(v.0)).unwrap().0, v.0);
    }

    #[test]
    fn map_parses_entries_in_order() {
        let entries = parse_map("eth0: 1000000; default: 500000").unwrap();
        assert_eq!(
            entries,
            vec![
                ("eth0".to_string(), "1000000".to_string()),
                ("default".to_string(), "500000".to_string()),
            ]
        );
    }

    #[test]
    fn ulimit_parses_named_resources_with_sentinel() {
        let parsed = parse_ulimits("nofile: 1024 unlim; nproc: 10 20").unwrap();
        assert_eq!(parsed["nofile"], (Some(1024), None));
        assert_eq!(parsed["nproc"], (Some(10), Some(20)));
    }

    #[test]
    fn ulimit_rejects_unknown_name() {
        assert!(parse_ulimits("bogus: 1 2").is_err());
    }

    #[test]
    fn net_priority_rejects_above_seven() {
        assert!(parse_net_priority("8").is_err());
        assert!(parse_net_priority("7").is_ok());
    }

    #[test]
    fn net_spec_parses_every_verb() {
        let text = "none; inherited; host; host eth0; container other; \
                     macvlan eth0 eth0.1 bridge 1500 hw; ipvlan eth0 eth0.2 l3; \
                     veth veth0 br0 1450 hw; L3 l3if eth0; NAT; MTU eth0 9000; \
                     autoconf eth0; netns ns0";
        let parsed = parse_net_spec(text).unwrap();
        assert_eq!(parsed.len(), 13);
        assert_eq!(parsed[0], NetSpecLine::None);
        assert_eq!(parsed[6], NetSpecLine::Macvlan {
            master: "eth0".into(),
            name: "eth0.1".into(),
            mode: Some("bridge".into()),
            mtu: Some(1500),
            hw: true,
        });
    }

    #[test]
    fn net_spec_rejects_unknown_verb() {
        assert!(parse_net_spec("bogus").is_err());
    }

    #[test]
    fn net_spec_round_trips_through_display() {
        let parsed = parse_net_spec("veth veth0 br0 1450 hw").unwrap();
        let formatted = format_net_spec(&parsed);
        let reparsed = parse_net_spec(&formatted).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
