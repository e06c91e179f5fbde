//! `/minimap` chat commands.

use crate::overlay::ScreenPosition;

pub const USAGE: &str = "Usage: /minimap <enable|disable|position <left|right>|marker add <name> <icon> [x z]|marker remove <name>|follow <player>|unfollow <player>|fullscreen>";

/// A parsed `/minimap` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinimapCommand {
    Enable,
    Disable,
    Position(ScreenPosition),
    MarkerAdd {
        name: String,
        icon: String,
        /// Defaults to the player's position.
        at: Option<(i32, i32)>,
    },
    MarkerRemove {
        name: String,
    },
    Follow {
        player: String,
    },
    Unfollow {
        player: String,
    },
    /// Open or close the fullscreen map.
    Fullscreen,
}

impl MinimapCommand {
    /// Parse the arguments after `/minimap`. Errors are user-facing.
    pub fn parse(args: &str) -> Result<Self, String> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let sub = parts.first().map(|s| s.to_lowercase()).unwrap_or_default();

        match (sub.as_str(), &parts[1.min(parts.len())..]) {
            ("enable", []) => Ok(Self::Enable),
            ("disable", []) => Ok(Self::Disable),
            ("position", [pos]) => pos.parse().map(Self::Position),
            ("marker", [action, rest @ ..]) => match (action.to_lowercase().as_str(), rest) {
                ("add", [name, icon]) => Ok(Self::MarkerAdd {
                    name: name.to_string(),
                    icon: icon.to_string(),
                    at: None,
                }),
                ("add", [name, icon, x, z]) => {
                    let x = x.parse().map_err(|_| format!("Invalid x coordinate: {}", x))?;
                    let z = z.parse().map_err(|_| format!("Invalid z coordinate: {}", z))?;
                    Ok(Self::MarkerAdd {
                        name: name.to_string(),
                        icon: icon.to_string(),
                        at: Some((x, z)),
                    })
                }
                ("remove", [name]) => Ok(Self::MarkerRemove { name: name.to_string() }),
                _ => Err(USAGE.to_string()),
            },
            ("follow", [player]) => Ok(Self::Follow {
                player: player.to_string(),
            }),
            ("unfollow", [player]) => Ok(Self::Unfollow {
                player: player.to_string(),
            }),
            ("fullscreen", []) => Ok(Self::Fullscreen),
            _ => Err(USAGE.to_string()),
        }
    }
}
