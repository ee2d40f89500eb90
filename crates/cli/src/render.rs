//! Drawing frames into a fixed region of the terminal.
//!
//! The region is addressed absolutely (`row_offset` .. `row_offset + height`)
//! and every draw is wrapped in a cursor save/restore, so whatever the
//! surrounding program prints keeps its cursor position.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crossterm::cursor::{Hide, MoveTo, RestorePosition, SavePosition, Show};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::queue;

use agent_avatar_protocol::AvatarState;

use crate::detect::ImageProtocol;

/// Kitty graphics payloads are sent in chunks of at most this many bytes.
const KITTY_CHUNK: usize = 4096;

/// Last row a cursor move can address (escape coordinates are 1-based u16).
const LAST_ROW: u16 = u16::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContent<'a> {
    Text(&'a str),
    Image { path: &'a Path, encoded: &'a str },
    /// Nothing loaded for this state.
    Placeholder,
}

#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub state: &'a AvatarState,
    pub index: usize,
    pub content: FrameContent<'a>,
}

/// Output side of the animation loop.
pub trait FrameSink: Send {
    fn draw(&mut self, frame: &Frame<'_>) -> io::Result<()>;

    /// The terminal changed size. The next `draw` repaints everything.
    fn resized(&mut self) -> io::Result<()>;

    /// Clear the region and show the cursor again.
    fn restore(&mut self) -> io::Result<()>;
}

/// Region of a real terminal, drawn with crossterm escape sequences.
pub struct TerminalRegion<W: Write> {
    out: W,
    width: u16,
    height: u16,
    row_offset: u16,
    protocol: ImageProtocol,
    /// Terminal width, once known. Clamps `width`.
    columns: Option<u16>,
    last_image: Option<PathBuf>,
    cursor_hidden: bool,
}

impl TerminalRegion<io::Stdout> {
    pub fn stdout(width: u16, height: u16, row_offset: u16, protocol: ImageProtocol) -> Self {
        let mut region = Self::new(io::stdout(), width, height, row_offset, protocol);
        region.columns = terminal::size().ok().map(|(cols, _)| cols);
        region
    }
}

impl<W: Write + Send> TerminalRegion<W> {
    pub fn new(out: W, width: u16, height: u16, row_offset: u16, protocol: ImageProtocol) -> Self {
        Self {
            out,
            width,
            height,
            row_offset: row_offset.min(LAST_ROW),
            protocol,
            columns: None,
            last_image: None,
            cursor_hidden: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn effective_width(&self) -> u16 {
        match self.columns {
            Some(cols) if cols > 0 => self.width.min(cols),
            _ => self.width,
        }
    }

    fn begin(&mut self) -> io::Result<()> {
        queue!(self.out, SavePosition, Hide)?;
        self.cursor_hidden = true;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        queue!(self.out, RestorePosition)?;
        self.out.flush()
    }

    fn write_lines(&mut self, lines: &[String]) -> io::Result<()> {
        for row in 0..self.height {
            // Rows past the addressable range are clipped
            let Some(y) = self.row_offset.checked_add(row).filter(|y| *y <= LAST_ROW) else {
                break;
            };
            let line = lines.get(row as usize).map(String::as_str).unwrap_or("");
            queue!(
                self.out,
                MoveTo(0, y),
                Clear(ClearType::UntilNewLine),
                Print(line)
            )?;
        }
        Ok(())
    }

    fn clear_lines(&mut self) -> io::Result<()> {
        if self.protocol == ImageProtocol::Kitty && self.last_image.is_some() {
            queue!(self.out, Print("\x1b_Ga=d\x1b\\"))?;
        }
        self.write_lines(&[])?;
        self.last_image = None;
        Ok(())
    }

    fn draw_text(&mut self, text: &str) -> io::Result<()> {
        if self.last_image.is_some() {
            self.clear_lines()?;
        }
        let lines = fit_lines(text, self.effective_width(), self.height);
        self.write_lines(&lines)
    }

    fn draw_image(&mut self, path: &Path, encoded: &str) -> io::Result<()> {
        if self.last_image.as_deref() == Some(path) {
            return Ok(());
        }
        self.clear_lines()?;
        queue!(self.out, MoveTo(0, self.row_offset))?;

        let (cols, rows) = (self.effective_width(), self.height);
        match self.protocol {
            ImageProtocol::Iterm2 => {
                write!(
                    self.out,
                    "\x1b]1337;File=inline=1;width={cols};height={rows};preserveAspectRatio=1:{encoded}\x07"
                )?;
            }
            ImageProtocol::Kitty => {
                let chunks = kitty_chunks(encoded);
                let last = chunks.len().saturating_sub(1);
                for (i, chunk) in chunks.iter().enumerate() {
                    let more = u8::from(i < last);
                    if i == 0 {
                        write!(self.out, "\x1b_Gf=100,a=T,c={cols},r={rows},m={more};{chunk}\x1b\\")?;
                    } else {
                        write!(self.out, "\x1b_Gm={more};{chunk}\x1b\\")?;
                    }
                }
            }
            ImageProtocol::None => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                let lines = fit_lines(&format!("[image: {name}]"), cols, rows);
                self.write_lines(&lines)?;
            }
        }
        self.last_image = Some(path.to_path_buf());
        Ok(())
    }
}

impl<W: Write + Send> FrameSink for TerminalRegion<W> {
    fn draw(&mut self, frame: &Frame<'_>) -> io::Result<()> {
        self.begin()?;
        match frame.content {
            FrameContent::Text(text) => self.draw_text(text)?,
            FrameContent::Image { path, encoded } => self.draw_image(path, encoded)?,
            FrameContent::Placeholder => self.draw_text(&format!("[{}]", frame.state))?,
        }
        self.finish()
    }

    fn resized(&mut self) -> io::Result<()> {
        self.columns = terminal::size().ok().map(|(cols, _)| cols);
        queue!(self.out, SavePosition)?;
        self.clear_lines()?;
        self.finish()
    }

    fn restore(&mut self) -> io::Result<()> {
        queue!(self.out, SavePosition)?;
        self.clear_lines()?;
        queue!(self.out, RestorePosition)?;
        if self.cursor_hidden {
            queue!(self.out, Show)?;
            self.cursor_hidden = false;
        }
        self.out.flush()
    }
}

/// At most `height` lines of `text`, each cut to `width` characters.
pub fn fit_lines(text: &str, width: u16, height: u16) -> Vec<String> {
    text.lines()
        .take(height as usize)
        .map(|line| line.chars().take(width as usize).collect())
        .collect()
}

fn kitty_chunks(encoded: &str) -> Vec<&str> {
    // base64 is ASCII, so byte offsets are char boundaries
    let mut chunks: Vec<&str> = encoded
        .as_bytes()
        .chunks(KITTY_CHUNK)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    if chunks.is_empty() {
        chunks.push("");
    }
    chunks
}

/// Terminal resize notifications (SIGWINCH).
pub struct ResizeWatcher {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl ResizeWatcher {
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            signal: signal(SignalKind::window_change())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Resolves on the next resize. `None` once the signal stream ends.
    pub async fn changed(&mut self) -> Option<()> {
        #[cfg(unix)]
        {
            self.signal.recv().await
        }
        #[cfg(not(unix))]
        {
            std::future::pending().await
        }
    }
}
