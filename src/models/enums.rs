use serde::{Deserialize, Serialize};

use crate::db::StorageError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = StorageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(StorageError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Role {
    User => "user",
    Assistant => "assistant",
});

str_enum!(Emotion {
    Happy => "happy",
    Sad => "sad",
    Neutral => "neutral",
    Love => "love",
});

impl Default for Emotion {
    fn default() -> Self {
        Emotion::Neutral
    }
}

impl Emotion {
    /// Normalize free-form model output into the valid emotion set.
    /// Anything unrecognized collapses to `Neutral`.
    pub fn normalize(raw: &str) -> Self {
        raw.trim().to_lowercase().parse().unwrap_or_default()
    }
}
