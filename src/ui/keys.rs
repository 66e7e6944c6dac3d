//! Key names for `send-keys`
//!
//! Arguments such as `Enter`, `C-c`, `M-x` or `F5` are turned into the VT
//! byte sequences a terminal would produce. Anything else is sent as typed.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to the bytes a terminal sends
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),
            // Pane input is a pipe, which does no CR to LF translation
            KeyCode::Enter => Some(vec![0x0A]),
            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }
            KeyCode::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    Some(b"\x1b[Z".to_vec())
                } else {
                    Some(vec![0x09])
                }
            }
            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::cursor_key(b'A', mods)),
            KeyCode::Down => Some(Self::cursor_key(b'B', mods)),
            KeyCode::Right => Some(Self::cursor_key(b'C', mods)),
            KeyCode::Left => Some(Self::cursor_key(b'D', mods)),
            KeyCode::Home => Some(Self::cursor_key(b'H', mods)),
            KeyCode::End => Some(Self::cursor_key(b'F', mods)),

            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
            match ch {
                '@' | '`' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                ']' => return vec![0x1D],
                '^' | '~' => return vec![0x1E],
                '_' | '?' => return vec![0x1F],
                _ => {}
            }
        }

        // Ctrl + Alt + letter
        if mods.contains(Modifiers::CTRL) && mods.contains(Modifiers::ALT) && ch.is_ascii_alphabetic() {
            return vec![0x1B, (ch.to_ascii_lowercase() as u8) - b'a' + 1];
        }

        // Alt + key = ESC + key
        if mods.contains(Modifiers::ALT) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }

    /// Arrow, Home and End: ESC [ X, or ESC [ 1 ; mod X with modifiers
    fn cursor_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    /// Function key sequence
    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        if (1..=4).contains(&n) {
            let key = b"PQRS"[usize::from(n - 1)];
            return Some(if mods.is_empty() {
                vec![0x1B, b'O', key]
            } else {
                format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
            });
        }

        let code = match n {
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(code, mods))
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

/// Parse a tmux-style key name such as `Enter`, `C-c`, `M-Left` or `F5`.
///
/// Returns `None` for anything that is not a key name.
pub fn parse_key_name(token: &str) -> Option<KeyEvent> {
    let mut mods = KeyModifiers::NONE;
    let mut rest = token;
    loop {
        let next = match rest.get(..2) {
            Some("C-") if rest.len() > 2 => KeyModifiers::CONTROL,
            Some("M-") if rest.len() > 2 => KeyModifiers::ALT,
            Some("S-") if rest.len() > 2 => KeyModifiers::SHIFT,
            _ => break,
        };
        mods |= next;
        rest = &rest[2..];
    }

    let code = match rest {
        "Enter" => KeyCode::Enter,
        "Tab" => KeyCode::Tab,
        "BTab" => {
            mods |= KeyModifiers::SHIFT;
            KeyCode::Tab
        }
        "Escape" => KeyCode::Esc,
        "Space" => KeyCode::Char(' '),
        "BSpace" => KeyCode::Backspace,
        "Up" => KeyCode::Up,
        "Down" => KeyCode::Down,
        "Left" => KeyCode::Left,
        "Right" => KeyCode::Right,
        "Home" => KeyCode::Home,
        "End" => KeyCode::End,
        "PageUp" | "PPage" => KeyCode::PageUp,
        "PageDown" | "NPage" => KeyCode::PageDown,
        "IC" | "Insert" => KeyCode::Insert,
        "DC" | "Delete" => KeyCode::Delete,
        _ => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                // A bare character is only a key name when modified
                (Some(ch), None) if !mods.is_empty() => KeyCode::Char(ch),
                _ => match rest.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
                    Some(n) if (1..=12).contains(&n) => KeyCode::F(n),
                    _ => return None,
                },
            }
        }
    };
    Some(KeyEvent::new(code, mods))
}

/// Turn `send-keys` arguments into the text sent to the pane.
///
/// With `literal` set every argument is sent unchanged.
pub fn encode_keys(args: &[String], literal: bool) -> Vec<u8> {
    let mut bytes = Vec::new();
    for arg in args {
        let mapped = if literal {
            None
        } else {
            parse_key_name(arg).and_then(|event| KeyMapper::map(&event))
        };
        match mapped {
            Some(seq) => bytes.extend(seq),
            None => bytes.extend(arg.as_bytes()),
        }
    }
    bytes
}
