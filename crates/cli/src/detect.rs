//! Inline image support of the hosting terminal.

/// Graphics protocol used to draw image frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProtocol {
    Kitty,
    /// OSC 1337 inline images (iTerm2, WezTerm).
    Iterm2,
    None,
}

impl ImageProtocol {
    pub fn supports_images(self) -> bool {
        !matches!(self, ImageProtocol::None)
    }
}

/// Detect from the process environment.
pub fn detect_image_protocol() -> ImageProtocol {
    detect_from(|key| std::env::var(key).ok())
}

pub fn detect_from(lookup: impl Fn(&str) -> Option<String>) -> ImageProtocol {
    let present = |key: &str| lookup(key).is_some_and(|v| !v.is_empty());

    if present("KITTY_WINDOW_ID") || lookup("TERM").as_deref() == Some("xterm-kitty") {
        return ImageProtocol::Kitty;
    }
    match lookup("TERM_PROGRAM").as_deref() {
        Some("iTerm.app") | Some("WezTerm") => ImageProtocol::Iterm2,
        _ => ImageProtocol::None,
    }
}
