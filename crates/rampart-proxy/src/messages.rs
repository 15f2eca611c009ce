//! Fixed texts shown to players, and the `§` legacy formatting used in
//! config strings and BungeeCord `Message` requests.

use rampart_protocol_core::version::supported_range_string;
use rampart_types::TextComponent;

pub fn already_connected() -> TextComponent {
    TextComponent::plain("You are already connected to this server!").colored("red")
}

pub fn already_connecting() -> TextComponent {
    TextComponent::plain("You are already connecting to a server!").colored("red")
}

pub fn no_available_servers() -> TextComponent {
    TextComponent::plain("No available server.").colored("red")
}

pub fn internal_server_connection_error() -> TextComponent {
    TextComponent::plain("Internal server connection error").colored("red")
}

pub fn invalid_username() -> TextComponent {
    TextComponent::plain("Your username has an invalid format.").colored("red")
}

pub fn logging_in_too_fast() -> TextComponent {
    TextComponent::plain("You are logging in too fast, please calm down and retry.").colored("red")
}

pub fn velocity_requires_1_13() -> TextComponent {
    TextComponent::plain("This server is only compatible with versions 1.13 and above.")
}

pub fn unable_to_authenticate() -> TextComponent {
    TextComponent::plain("Unable to authenticate you with Mojang.\nPlease try again!").colored("red")
}

pub fn online_mode_only() -> TextComponent {
    TextComponent::plain(
        "This server only accepts connections from online-mode clients.\n\n\
         Did you change your username? Restart your Minecraft client \
         and try again or switch to online-mode.",
    )
    .colored("red")
}

pub fn illegal_protocol_state() -> TextComponent {
    TextComponent::plain(
        "A proxy plugin caused an illegal protocol state. Contact your network administrator.",
    )
    .colored("red")
}

pub fn missing_velocity_forwarding() -> TextComponent {
    TextComponent::plain(
        "Your server did not send a forwarding request to the proxy. \
         Is velocity forwarding set up correctly?",
    )
}

pub fn outdated_client() -> TextComponent {
    translatable(
        "multiplayer.disconnect.outdated_client",
        vec![TextComponent::plain(supported_range_string())],
    )
}

pub fn translatable(key: &str, args: Vec<TextComponent>) -> TextComponent {
    TextComponent::translatable(key, args)
}

pub fn kicked_from_current(reason: Option<TextComponent>) -> TextComponent {
    with_reason(
        TextComponent::plain("The server you were on kicked you: ").colored("red"),
        reason,
    )
}

pub fn cant_connect(server: &str, reason: Option<TextComponent>) -> TextComponent {
    with_reason(
        TextComponent::plain(format!("Can't connect to server \"{}\": ", server)).colored("red"),
        reason,
    )
}

pub fn unable_to_connect(server: &str) -> TextComponent {
    TextComponent::plain(format!("Unable to connect to \"{}\". Try again later.", server))
        .colored("red")
}

pub fn connection_error(server: &str) -> TextComponent {
    TextComponent::plain(format!(
        "Your connection to server \"{}\" encountered an error.",
        server
    ))
    .colored("red")
}

fn with_reason(prefix: TextComponent, reason: Option<TextComponent>) -> TextComponent {
    match reason {
        Some(reason) => prefix.append(reason),
        None => prefix,
    }
}

const LEGACY_CHAR: char = '§';

fn legacy_color(code: char) -> Option<&'static str> {
    Some(match code {
        '0' => "black",
        '1' => "dark_blue",
        '2' => "dark_green",
        '3' => "dark_aqua",
        '4' => "dark_red",
        '5' => "dark_purple",
        '6' => "gold",
        '7' => "gray",
        '8' => "dark_gray",
        '9' => "blue",
        'a' => "green",
        'b' => "aqua",
        'c' => "red",
        'd' => "light_purple",
        'e' => "yellow",
        'f' => "white",
        _ => return None,
    })
}

/// Parse `§`-coded text into a component. Colors reset formatting; `l`
/// and `o` set bold and italic; `r` resets; other codes are dropped.
pub fn from_legacy(text: &str) -> TextComponent {
    let mut root = TextComponent::plain("");
    let mut current = TextComponent::default();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != LEGACY_CHAR && c != '&' {
            current.text.push(c);
            continue;
        }
        let Some(code) = chars.peek().map(|c| c.to_ascii_lowercase()) else {
            current.text.push(c);
            continue;
        };
        let known = legacy_color(code).is_some() || matches!(code, 'k'..='o' | 'r');
        if c == '&' && !known {
            current.text.push(c);
            continue;
        }
        chars.next();
        let mut next = TextComponent::default();
        match code {
            'l' => {
                next.color = current.color.clone();
                next.italic = current.italic;
                next.bold = Some(true);
            }
            'o' => {
                next.color = current.color.clone();
                next.bold = current.bold;
                next.italic = Some(true);
            }
            'r' => {}
            other => match legacy_color(other) {
                Some(color) => next.color = Some(color.to_string()),
                None => {
                    next.color = current.color.clone();
                    next.bold = current.bold;
                    next.italic = current.italic;
                }
            },
        }
        let done = std::mem::replace(&mut current, next);
        if !done.text.is_empty() {
            root.extra.push(done);
        }
    }
    if !current.text.is_empty() {
        root.extra.push(current);
    }
    if root.extra.len() == 1 {
        let only = root.extra.remove(0);
        if only.color.is_none() && only.bold.is_none() && only.italic.is_none() {
            return only;
        }
        root.extra.push(only);
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_plain() {
        let c = from_legacy("hello");
        assert_eq!(c.text, "hello");
        assert!(c.extra.is_empty());
    }

    #[test]
    fn test_legacy_colors_and_bold() {
        let c = from_legacy("§bA §lRampart§r Proxy");
        assert_eq!(c.plain_text(), "A Rampart Proxy");
        assert_eq!(c.extra[0].color.as_deref(), Some("aqua"));
        assert_eq!(c.extra[1].bold, Some(true));
        assert_eq!(c.extra[1].color.as_deref(), Some("aqua"));
        assert_eq!(c.extra[2].color, None);
    }

    #[test]
    fn test_ampersand_only_for_codes() {
        assert_eq!(from_legacy("fish & chips").plain_text(), "fish & chips");
        assert_eq!(from_legacy("&cred").extra[0].color.as_deref(), Some("red"));
    }

    #[test]
    fn test_kick_reason_is_appended() {
        let msg = kicked_from_current(Some(TextComponent::plain("server full")));
        assert_eq!(msg.plain_text(), "The server you were on kicked you: server full");
        assert_eq!(msg.color.as_deref(), Some("red"));
    }

    #[test]
    fn test_outdated_client_carries_range() {
        let msg = outdated_client();
        assert_eq!(msg.translate.as_deref(), Some("multiplayer.disconnect.outdated_client"));
        assert_eq!(msg.args.len(), 1);
    }
}
