//! Output multiplexing onto the shared terminal.
//!
//! One [`OutputMux`] exists per run. It constructs one sink per command and
//! owns the mutual-exclusion discipline for the terminal: every terminal
//! mutation — a sink printing a line, a box redraw, the resize reflow — holds
//! the same lock, so concurrent writers never interleave partial output.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::command::CommandSpec;
use crate::config::OutputKind;
use crate::output::{sanitize_text, LineBuffer, OutputSink};
use crate::term::Console;

/// Poll interval for terminal-size changes in boxed mode.
const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Terminal coordinates of the boxed display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    top: u16,
    width: u16,
    box_height: u16,
    count: u16,
}

impl Geometry {
    fn compute(size: (u16, u16), top: u16, box_size: Option<u16>, count: u16) -> Self {
        let (width, rows) = size;
        let even_split = if count == 0 { rows } else { rows / count };
        let box_height = box_size.unwrap_or(even_split).max(1);
        Self {
            top,
            width,
            box_height,
            count,
        }
    }

    fn box_top(&self, index: u16) -> u16 {
        self.top
            .saturating_add(self.box_height.saturating_mul(index))
    }

    fn total_height(&self) -> u16 {
        self.box_height
            .saturating_mul(self.count)
            .saturating_add(1)
    }

    fn bottom(&self) -> u16 {
        self.top.saturating_add(self.total_height())
    }
}

/// One command's region: a header row plus a bounded scrollback.
struct CommandBox {
    header: String,
    top: u16,
    width: u16,
    show_header: bool,
    lines: LineBuffer,
}

impl CommandBox {
    fn new(header: String, top: u16, width: u16, box_height: u16) -> Self {
        Self {
            header,
            top,
            width,
            show_header: box_height > 1,
            lines: LineBuffer::new(Self::content_capacity(box_height)),
        }
    }

    // A one-row box has no room for a header; the single row shows content.
    fn content_capacity(box_height: u16) -> usize {
        if box_height > 1 {
            (box_height - 1) as usize
        } else {
            box_height as usize
        }
    }

    fn draw_header(&self, console: &mut dyn Console) -> io::Result<()> {
        if self.show_header {
            console.put_header(self.top, &fit_width(&self.header, self.width as usize))?;
        }
        Ok(())
    }

    fn redraw_content(&self, console: &mut dyn Console) -> io::Result<()> {
        let first = if self.show_header {
            self.top.saturating_add(1)
        } else {
            self.top
        };
        for (offset, line) in self.lines.iter().enumerate() {
            let row = first.saturating_add(offset as u16);
            console.put_line(row, &fit_width(line, self.width as usize))?;
        }
        Ok(())
    }

    fn resize(
        &mut self,
        top: u16,
        width: u16,
        box_height: u16,
        console: &mut dyn Console,
    ) -> io::Result<()> {
        self.top = top;
        self.width = width;
        self.show_header = box_height > 1;
        self.lines.resize(Self::content_capacity(box_height));
        self.draw_header(console)?;
        if self.lines.is_empty() {
            return Ok(());
        }
        self.redraw_content(console)
    }
}

/// Pads `line` to exactly `width` columns, truncating over-wide lines with an
/// ellipsis instead of letting the terminal wrap them.
fn fit_width(line: &str, width: usize) -> String {
    let length = line.chars().count();
    if length <= width {
        return format!("{line:<width$}");
    }
    if width <= 3 {
        return line.chars().take(width).collect();
    }
    let mut truncated: String = line.chars().take(width - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Shared state of the boxed display, mutated only under its lock.
struct BoxedDisplay {
    console: Box<dyn Console>,
    geometry: Geometry,
    box_size: Option<u16>,
    last_size: (u16, u16),
    boxes: Vec<CommandBox>,
}

impl BoxedDisplay {
    fn init(
        mut console: Box<dyn Console>,
        count: u16,
        box_size: Option<u16>,
    ) -> io::Result<Self> {
        let size = console.size()?;
        let mut top = console.cursor_row()?;
        let mut geometry = Geometry::compute(size, top, box_size, count);

        // Scroll the viewport so the whole stack fits below the cursor row.
        let rows = size.1;
        let needed = geometry.total_height();
        if top.saturating_add(needed) > rows {
            console.scroll_up(top.saturating_add(needed) - rows)?;
            top = rows.saturating_sub(needed);
            geometry.top = top;
        }
        console.set_cursor_hidden(true)?;

        Ok(Self {
            console,
            geometry,
            box_size,
            last_size: size,
            boxes: Vec::new(),
        })
    }

    fn add_box(&mut self, header: String) -> usize {
        let index = self.boxes.len();
        let command_box = CommandBox::new(
            header,
            self.geometry.box_top(index as u16),
            self.geometry.width,
            self.geometry.box_height,
        );
        let _ = command_box.draw_header(self.console.as_mut());
        self.boxes.push(command_box);
        index
    }

    fn write_line(&mut self, index: usize, line: &str) {
        let Self { console, boxes, .. } = self;
        if let Some(command_box) = boxes.get_mut(index) {
            command_box.lines.push(sanitize_text(line));
            let _ = command_box.redraw_content(console.as_mut());
        }
    }

    fn reflow_if_resized(&mut self) -> io::Result<()> {
        let size = self.console.size()?;
        if size == self.last_size {
            return Ok(());
        }
        self.last_size = size;
        self.console.clear()?;
        self.console.set_cursor_hidden(true)?;
        self.geometry = Geometry::compute(size, 0, self.box_size, self.geometry.count);

        let Self {
            console,
            geometry,
            boxes,
            ..
        } = self;
        for (index, command_box) in boxes.iter_mut().enumerate() {
            command_box.resize(
                geometry.box_top(index as u16),
                geometry.width,
                geometry.box_height,
                console.as_mut(),
            )?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let rows = self.last_size.1;
        let below = self.geometry.bottom().min(rows.saturating_sub(1));
        self.console.move_to_row(below)?;
        self.console.set_cursor_hidden(false)
    }
}

/// Factory and coordination state for all of a run's output sinks.
pub struct OutputMux {
    inner: MuxInner,
}

enum MuxInner {
    Interlaced {
        console: Arc<Mutex<Box<dyn Console>>>,
        next_index: usize,
    },
    Boxed {
        display: Arc<Mutex<BoxedDisplay>>,
        watcher: Option<JoinHandle<()>>,
    },
}

impl OutputMux {
    /// Sets up the terminal for the chosen presentation.
    ///
    /// In boxed mode this records the cursor row, computes the box geometry
    /// for `command_count` commands, scrolls the viewport to make room, and
    /// hides the cursor.
    pub fn new(
        kind: OutputKind,
        console: Box<dyn Console>,
        command_count: usize,
        box_size: Option<u16>,
    ) -> io::Result<Self> {
        let inner = match kind {
            OutputKind::Interlaced => MuxInner::Interlaced {
                console: Arc::new(Mutex::new(console)),
                next_index: 0,
            },
            OutputKind::Boxed => {
                let display = BoxedDisplay::init(console, command_count as u16, box_size)?;
                MuxInner::Boxed {
                    display: Arc::new(Mutex::new(display)),
                    watcher: None,
                }
            }
        };
        Ok(Self { inner })
    }

    /// Creates the sink for the next command, in command order.
    ///
    /// The sink immediately announces the command on the terminal: interlaced
    /// mode prints a `[index] command` line, boxed mode draws the header row.
    pub fn create_sink(&mut self, spec: &CommandSpec) -> Arc<dyn OutputSink> {
        match &mut self.inner {
            MuxInner::Interlaced {
                console,
                next_index,
            } => {
                let sink = Arc::new(InterlacedSink {
                    index: *next_index,
                    console: Arc::clone(console),
                });
                *next_index += 1;
                sink.write_line(&spec.display());
                sink
            }
            MuxInner::Boxed { display, .. } => {
                let index = display.lock().add_box(spec.display());
                Arc::new(BoxedSink {
                    index,
                    display: Arc::clone(display),
                })
            }
        }
    }

    /// Starts the background poller that reflows all boxes when the terminal
    /// geometry changes. Interlaced mode needs no geometry and ignores this.
    pub fn start_resize_watcher(&mut self) {
        if let MuxInner::Boxed { display, watcher } = &mut self.inner {
            let display = Arc::clone(display);
            *watcher = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(RESIZE_POLL_INTERVAL);
                loop {
                    ticker.tick().await;
                    let _ = display.lock().reflow_if_resized();
                }
            }));
        }
    }

    /// Releases the terminal: stops the resize watcher, parks the cursor
    /// below the last box, and restores cursor visibility.
    pub fn close(self) -> io::Result<()> {
        match self.inner {
            MuxInner::Interlaced { .. } => Ok(()),
            MuxInner::Boxed { display, watcher } => {
                if let Some(watcher) = watcher {
                    watcher.abort();
                }
                display.lock().close()
            }
        }
    }
}

/// Sink printing `[index] line` to the shared append-only stream.
struct InterlacedSink {
    index: usize,
    console: Arc<Mutex<Box<dyn Console>>>,
}

impl OutputSink for InterlacedSink {
    fn write_line(&self, line: &str) {
        let mut console = self.console.lock();
        let _ = console.print_line(&format!("[{}] {}", self.index, line));
    }
}

/// Sink redrawing one command's box region on every line.
struct BoxedSink {
    index: usize,
    display: Arc<Mutex<BoxedDisplay>>,
}

impl OutputSink for BoxedSink {
    fn write_line(&self, line: &str) {
        self.display.lock().write_line(self.index, line);
    }
}
