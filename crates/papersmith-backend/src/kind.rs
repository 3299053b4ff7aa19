use std::fmt;
use std::str::FromStr;

/// Closed set of backend identifiers accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Gemini,
    OpenAi,
    LocalCpu,
    LocalAccelerated,
    /// Deterministic hashing embedder; embedding role only.
    Fake,
}

/// Which capability a backend is being created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Embedding,
    Generation,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Embedding => "embedding",
            Role::Generation => "generation",
        }
    }
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Gemini,
        BackendKind::OpenAi,
        BackendKind::LocalCpu,
        BackendKind::LocalAccelerated,
        BackendKind::Fake,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gemini => "gemini",
            BackendKind::OpenAi => "openai",
            BackendKind::LocalCpu => "local-cpu",
            BackendKind::LocalAccelerated => "local-accelerated",
            BackendKind::Fake => "fake",
        }
    }

    pub fn supports(&self, role: Role) -> bool {
        !matches!((self, role), (BackendKind::Fake, Role::Generation))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown backend '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_identifier_case_insensitively() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!(" OpenAI ".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert!("ollama".parse::<BackendKind>().is_err());
    }

    #[test]
    fn fake_cannot_generate() {
        assert!(BackendKind::Fake.supports(Role::Embedding));
        assert!(!BackendKind::Fake.supports(Role::Generation));
        assert!(BackendKind::LocalCpu.supports(Role::Generation));
    }
}
