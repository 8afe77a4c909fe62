//! Terminal device access.
//!
//! All terminal interaction goes through the [`Console`] trait: size and
//! cursor queries, cursor-addressed writes, colors, clearing, and scrolling.
//! The real implementation drives the terminal with `crossterm`; tests use a
//! recording console that captures every write.

use std::io::{self, Stdout, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType, ScrollUp};
use crossterm::{execute, queue};

/// Primitive terminal operations needed by the output sinks.
pub trait Console: Send {
    /// Current terminal size as `(columns, rows)`.
    fn size(&mut self) -> io::Result<(u16, u16)>;

    /// Row of the cursor's current position.
    fn cursor_row(&mut self) -> io::Result<u16>;

    /// Writes a line at the current position with natural append/scroll
    /// behavior, followed by a newline.
    fn print_line(&mut self, text: &str) -> io::Result<()>;

    /// Writes `text` at column 0 of `row` without emitting a newline.
    fn put_line(&mut self, row: u16, text: &str) -> io::Result<()>;

    /// Writes a header line at column 0 of `row` in the header colors.
    fn put_header(&mut self, row: u16, text: &str) -> io::Result<()>;

    /// Moves the cursor to column 0 of `row`.
    fn move_to_row(&mut self, row: u16) -> io::Result<()>;

    /// Clears the whole screen.
    fn clear(&mut self) -> io::Result<()>;

    /// Hides or shows the cursor.
    fn set_cursor_hidden(&mut self, hidden: bool) -> io::Result<()>;

    /// Scrolls the viewport contents up by `rows` lines.
    fn scroll_up(&mut self, rows: u16) -> io::Result<()>;
}

/// `crossterm`-backed console writing to stdout.
pub struct AnsiConsole {
    stdout: Stdout,
}

impl AnsiConsole {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }
}

impl Console for AnsiConsole {
    fn size(&mut self) -> io::Result<(u16, u16)> {
        crossterm::terminal::size()
    }

    fn cursor_row(&mut self) -> io::Result<u16> {
        let (_, row) = crossterm::cursor::position()?;
        Ok(row)
    }

    fn print_line(&mut self, text: &str) -> io::Result<()> {
        execute!(self.stdout, Print(text), Print("\n"))
    }

    fn put_line(&mut self, row: u16, text: &str) -> io::Result<()> {
        execute!(self.stdout, MoveTo(0, row), Print(text))
    }

    fn put_header(&mut self, row: u16, text: &str) -> io::Result<()> {
        queue!(
            self.stdout,
            MoveTo(0, row),
            SetBackgroundColor(Color::DarkBlue),
            SetForegroundColor(Color::Grey),
            Print(text),
            ResetColor,
        )?;
        self.stdout.flush()
    }

    fn move_to_row(&mut self, row: u16) -> io::Result<()> {
        execute!(self.stdout, MoveTo(0, row))
    }

    fn clear(&mut self) -> io::Result<()> {
        execute!(self.stdout, Clear(ClearType::All))
    }

    fn set_cursor_hidden(&mut self, hidden: bool) -> io::Result<()> {
        if hidden {
            execute!(self.stdout, Hide)
        } else {
            execute!(self.stdout, Show)
        }
    }

    fn scroll_up(&mut self, rows: u16) -> io::Result<()> {
        if rows == 0 {
            return Ok(());
        }
        execute!(self.stdout, ScrollUp(rows))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A console that records writes instead of touching a terminal.

    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::Console;

    /// One recorded terminal mutation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TermEvent {
        Print(String),
        Put { row: u16, text: String },
        Header { row: u16, text: String },
        MoveTo(u16),
        Clear,
        CursorHidden(bool),
        Scroll(u16),
    }

    /// Observable state of the fake terminal.
    #[derive(Debug)]
    pub struct TestTerm {
        pub size: (u16, u16),
        pub cursor: u16,
        pub events: Vec<TermEvent>,
        /// Latest text written to each row via cursor addressing.
        pub rows: BTreeMap<u16, String>,
    }

    impl TestTerm {
        pub fn row(&self, row: u16) -> &str {
            self.rows.get(&row).map(String::as_str).unwrap_or("")
        }

        pub fn printed(&self) -> Vec<String> {
            self.events
                .iter()
                .filter_map(|event| match event {
                    TermEvent::Print(text) => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    /// A [`Console`] recording into a shared [`TestTerm`].
    pub struct TestConsole {
        term: Arc<Mutex<TestTerm>>,
    }

    impl TestConsole {
        pub fn new(cols: u16, rows: u16) -> (Self, Arc<Mutex<TestTerm>>) {
            let term = Arc::new(Mutex::new(TestTerm {
                size: (cols, rows),
                cursor: 0,
                events: Vec::new(),
                rows: BTreeMap::new(),
            }));
            (Self { term: term.clone() }, term)
        }
    }

    impl Console for TestConsole {
        fn size(&mut self) -> io::Result<(u16, u16)> {
            Ok(self.term.lock().size)
        }

        fn cursor_row(&mut self) -> io::Result<u16> {
            Ok(self.term.lock().cursor)
        }

        fn print_line(&mut self, text: &str) -> io::Result<()> {
            let mut term = self.term.lock();
            term.events.push(TermEvent::Print(text.to_string()));
            let rows = term.size.1;
            term.cursor = (term.cursor + 1).min(rows.saturating_sub(1));
            Ok(())
        }

        fn put_line(&mut self, row: u16, text: &str) -> io::Result<()> {
            let mut term = self.term.lock();
            term.events.push(TermEvent::Put {
                row,
                text: text.to_string(),
            });
            term.rows.insert(row, text.to_string());
            Ok(())
        }

        fn put_header(&mut self, row: u16, text: &str) -> io::Result<()> {
            let mut term = self.term.lock();
            term.events.push(TermEvent::Header {
                row,
                text: text.to_string(),
            });
            term.rows.insert(row, text.to_string());
            Ok(())
        }

        fn move_to_row(&mut self, row: u16) -> io::Result<()> {
            let mut term = self.term.lock();
            term.events.push(TermEvent::MoveTo(row));
            term.cursor = row;
            Ok(())
        }

        fn clear(&mut self) -> io::Result<()> {
            let mut term = self.term.lock();
            term.events.push(TermEvent::Clear);
            term.rows.clear();
            term.cursor = 0;
            Ok(())
        }

        fn set_cursor_hidden(&mut self, hidden: bool) -> io::Result<()> {
            self.term.lock().events.push(TermEvent::CursorHidden(hidden));
            Ok(())
        }

        fn scroll_up(&mut self, rows: u16) -> io::Result<()> {
            self.term.lock().events.push(TermEvent::Scroll(rows));
            Ok(())
        }
    }
}
