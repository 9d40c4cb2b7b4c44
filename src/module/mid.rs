use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::{CrawlError, CrawlResult};

/// The closed set of module roles the scheduler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleType {
    Downloader,
    Analyzer,
    Pipeline,
}

impl ModuleType {
    pub const ALL: [ModuleType; 3] = [
        ModuleType::Downloader,
        ModuleType::Analyzer,
        ModuleType::Pipeline,
    ];

    pub fn letter(&self) -> char {
        match self {
            ModuleType::Downloader => 'D',
            ModuleType::Analyzer => 'A',
            ModuleType::Pipeline => 'P',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'D' => Some(ModuleType::Downloader),
            'A' => Some(ModuleType::Analyzer),
            'P' => Some(ModuleType::Pipeline),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleType::Downloader => "downloader",
            ModuleType::Analyzer => "analyzer",
            ModuleType::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// Module identifier: `<letter><serial>` optionally followed by `|<ip:port>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mid(String);

/// Parsed parts of a [`Mid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidParts {
    pub module_type: ModuleType,
    pub sn: u64,
    pub addr: Option<SocketAddr>,
}

impl Mid {
    /// Wraps a raw string without validating it. Use [`Mid::from_str`] to validate.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Mid(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> CrawlResult<MidParts> {
        split_mid(&self.0)
    }

    pub fn module_type(&self) -> CrawlResult<ModuleType> {
        Ok(self.parts()?.module_type)
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.parts().ok().and_then(|p| p.addr)
    }
}

impl fmt::Display for Mid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Mid {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        split_mid(s)?;
        Ok(Mid(s.to_string()))
    }
}

pub fn generate_mid(module_type: ModuleType, sn: u64, addr: Option<SocketAddr>) -> Mid {
    match addr {
        Some(addr) => Mid(format!("{}{}|{}", module_type.letter(), sn, addr)),
        None => Mid(format!("{}{}", module_type.letter(), sn)),
    }
}

pub fn split_mid(raw: &str) -> CrawlResult<MidParts> {
    let mut chars = raw.chars();
    let letter = chars
        .next()
        .ok_or_else(|| CrawlError::Argument("empty module id".to_string()))?;
    let module_type = ModuleType::from_letter(letter).ok_or_else(|| {
        CrawlError::Argument(format!("illegal module type letter {:?} in {:?}", letter, raw))
    })?;
    let rest = chars.as_str();

    let (sn_part, addr) = match rest.rfind('|') {
        Some(index) => {
            let addr_part = &rest[index + 1..];
            let addr = addr_part.parse::<SocketAddr>().map_err(|_| {
                CrawlError::Argument(format!("illegal module address {:?} in {:?}", addr_part, raw))
            })?;
            (&rest[..index], Some(addr))
        }
        None => (rest, None),
    };

    if sn_part.is_empty() || !sn_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CrawlError::Argument(format!(
            "illegal module serial number {:?} in {:?}",
            sn_part, raw
        )));
    }
    let sn = sn_part
        .parse::<u64>()
        .map_err(|e| CrawlError::Argument(format!("module serial number overflow in {:?}: {}", raw, e)))?;

    Ok(MidParts {
        module_type,
        sn,
        addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_split() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        for module_type in ModuleType::ALL {
            let mid = generate_mid(module_type, 42, Some(addr));
            let parts = mid.parts().unwrap();
            assert_eq!(parts.module_type, module_type);
            assert_eq!(parts.sn, 42);
            assert_eq!(parts.addr, Some(addr));
        }
        assert_eq!(generate_mid(ModuleType::Analyzer, 1, None).as_str(), "A1");
    }

    #[test]
    fn test_legal_mids() {
        for raw in ["D0", "A1", "P2", "D1|127.0.0.1:8080", "p7|[::1]:9000"] {
            assert!(raw.parse::<Mid>().is_ok(), "{} should be legal", raw);
        }
    }

    #[test]
    fn test_illegal_mids() {
        for raw in [
            "",
            "M1",
            "D",
            "D127.0.0.1",
            "Dx|127.0.0.1:8080",
            "D1|127.0.0.1",
            "D1|localhost:80",
            "D1|127.0.0.1:port",
        ] {
            assert!(raw.parse::<Mid>().is_err(), "{} should be illegal", raw);
        }
    }
}
