use serde::Serialize;

use crate::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Icon {
    Award,
    Shield,
    Crown,
    Gem,
}

/// Presentation for a tier badge: icon, css class and card gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub icon: Icon,
    pub class: &'static str,
    pub color: &'static str,
}

impl Badge {
    pub const fn for_level(level: Level) -> Self {
        match level {
            Level::Bronze => Badge {
                icon: Icon::Award,
                class: "badge-bronze",
                color: "from-amber-600 to-amber-800",
            },
            Level::Silver => Badge {
                icon: Icon::Shield,
                class: "badge-silver",
                color: "from-slate-400 to-slate-600",
            },
            Level::Gold => Badge {
                icon: Icon::Crown,
                class: "badge-gold",
                color: "from-yellow-400 to-amber-500",
            },
            Level::Diamond => Badge {
                icon: Icon::Gem,
                class: "badge-diamond",
                color: "from-blue-400 to-blue-600",
            },
            Level::Pearl => Badge {
                icon: Icon::Gem,
                class: "badge-pearl",
                color: "from-purple-400 to-purple-600",
            },
        }
    }
}
