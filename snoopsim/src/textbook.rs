//! Textbook mode: interactive table printers that drive a single set of
//! one-line caches through a coherence protocol, or a single set through a
//! replacement policy, echoing each operation's bus events and resulting
//! states the way the textbook diagrams do.
//!
//! Commands arrive one per line on stdin. The coherence view accepts
//! `R<n>`, `W<n>`, `E<n>` (1-based line number), `X` to reset, and `#`
//! comments; the replacer view accepts a letter `A..Z` to access that tag
//! and `-` to reset. SIGINT ends the loop gracefully so the closing table
//! border still prints.

use std::io::{self, BufRead, IsTerminal};
use std::sync::mpsc;
use std::thread;

use snooplib::coherence::{BusPort, CoherenceKind};
use snooplib::config::arg;
use snooplib::line::{BusMsg, CacheLine, LineState};
use snooplib::replacement::{ReplacementPolicy, Replacer, ReplacerKind};

/// Number of one-line caches (coherence view) and ways (replacer view).
const N_TEXTBOOK_LINES: usize = 5;

/// Dummy tag marking a textbook line as allocated; tag 0 means empty.
const ALLOCATED: u32 = 0x5555_5555;

/// Resolve `name` against the coherence registry first, then the replacer
/// registry, and run the matching view's REPL.
pub fn run(name: &str) -> i32 {
    if let Some(kind) = CoherenceKind::from_name(name) {
        repl(CoherenceView::new(kind))
    } else if let Some(kind) = ReplacerKind::from_name(name) {
        repl(ReplacerView::new(kind))
    } else {
        eprintln!(
            "{}@0: Couldn't find a coherence protocol or replacement policy with that name!",
            arg::TEXTBOOK
        );
        arg::TEXTBOOK as i32
    }
}

trait View {
    /// Evaluate one command; false when it is malformed
    fn eval(&mut self, cmd: &str) -> bool;
    fn print_format_message(&self);
    fn print_separator(&self);
}

enum Event {
    Line(String),
    Eof,
    Interrupt,
}

fn repl(mut view: impl View) -> i32 {
    let (sender, receiver) = mpsc::channel::<Event>();

    // SIGINT feeds the loop an event instead of killing the process, so
    // the bottom border of the table still prints
    let interrupt_sender = sender.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = interrupt_sender.send(Event::Interrupt);
    });

    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(Event::Line(line)).is_err() {
                return;
            }
        }
        let _ = sender.send(Event::Eof);
    });

    let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
    let mut line_count = 0u32;
    for event in &receiver {
        match event {
            Event::Interrupt => {
                print!("\r");
                break;
            }
            Event::Eof => break,
            Event::Line(line) => {
                line_count += 1;
                // Overwrite the echoed command when driven from a terminal
                if interactive {
                    print!("\x1b[A");
                }
                let cmd = line.trim();
                if cmd.is_empty() || cmd.starts_with('#') {
                    continue;
                }
                if !view.eval(cmd) {
                    if !io::stdin().is_terminal() {
                        eprint!("Line {line_count}: ");
                    }
                    view.print_format_message();
                }
            }
        }
    }

    // Close out the table
    view.print_separator();
    0
}

// ---------------------------------------------------------------------------
// Coherence view

/// Column widths for the coherence table.
const COL_OP: usize = 2;
const COL_EVENT: usize = 16;
const COL_SOURCE: usize = 11;
const COL_STATES: usize = 3 * N_TEXTBOOK_LINES - 1;

/// One entry in the per-operation event log.
#[derive(Clone, Copy)]
enum TbEvent {
    Msg(BusMsg),
    LineFlush,
    LineFetch,
    CacheToCache,
    WriteBack,
    WriteMemory,
}

impl TbEvent {
    fn name(self) -> &'static str {
        match self {
            TbEvent::Msg(msg) => msg.name(),
            TbEvent::LineFlush => "Line Flush",
            TbEvent::LineFetch => "Line Fetch",
            TbEvent::CacheToCache => "Cache to Cache",
            TbEvent::WriteBack => "Write Back",
            TbEvent::WriteMemory => "Write Memory",
        }
    }
}

#[derive(Clone, Copy)]
enum Command {
    None,
    Read(usize),
    Write(usize),
    Evict(usize),
}

/// Five one-line caches sharing one protocol instance. The view is its own
/// bus: issued messages are snooped by the other four lines directly.
struct CoherenceView {
    protocol: CoherenceKind,
    lines: [CacheLine; N_TEXTBOOK_LINES],
    /// (event, issuer); an issuer of `N_TEXTBOOK_LINES` means main memory
    events: Vec<(TbEvent, usize)>,
    command: Command,
}

impl CoherenceView {
    fn new(protocol: CoherenceKind) -> Self {
        let view = Self {
            protocol,
            lines: [blank_line(); N_TEXTBOOK_LINES],
            events: Vec::new(),
            command: Command::None,
        };
        println!(
            "{:<op$} | {:<ev$} | {:<src$} | {}",
            "OP",
            "Bus Event",
            "Data Source",
            "States",
            op = COL_OP,
            ev = COL_EVENT,
            src = COL_SOURCE,
        );
        view.print_separator();
        view.print_stats();
        view
    }

    fn command_issuer(&self) -> usize {
        match self.command {
            Command::Read(n) | Command::Write(n) | Command::Evict(n) => n,
            Command::None => 0,
        }
    }

    fn receive_pr_rd(&mut self, n: usize) {
        self.events.clear();
        self.command = Command::Read(n);

        if self.lines[n].tag == 0 {
            self.lines[n].tag = ALLOCATED;
            self.lines[n].state = LineState::I;
        }

        // The FSM runs on a copy so the view itself can serve as the bus;
        // snoops never touch the issuer's line
        let protocol = self.protocol;
        let mut line = self.lines[n];
        protocol.on_pr_rd(&mut line, self);
        self.lines[n] = line;
    }

    fn receive_pr_wr(&mut self, n: usize) {
        self.events.clear();
        self.command = Command::Write(n);

        let protocol = self.protocol;
        if protocol.does_write_no_allocate() {
            self.events.push((TbEvent::WriteMemory, n));
        } else if self.lines[n].tag == 0 {
            self.lines[n].tag = ALLOCATED;
            self.lines[n].state = LineState::I;
        }

        if self.lines[n].tag != 0 {
            let mut line = self.lines[n];
            protocol.on_pr_wr(Some(&mut line), self);
            self.lines[n] = line;
        } else {
            protocol.on_pr_wr(None, self);
        }
    }

    fn receive_evict(&mut self, n: usize) {
        self.events.clear();
        self.command = Command::Evict(n);

        if self.lines[n].tag != 0 && self.protocol.is_write_back_needed(self.lines[n].state) {
            self.events.push((TbEvent::LineFlush, n));
            self.events.push((TbEvent::WriteBack, n));
        }
        self.lines[n] = blank_line();
    }

    /// Deliver a snooped message to line `i`, logging any writeback.
    fn snoop(&mut self, msg: BusMsg, i: usize) -> bool {
        let protocol = self.protocol;
        match msg {
            BusMsg::BusRead => {
                let prev = self.lines[i].state;
                let flushed = protocol.on_bus_rd(&mut self.lines[i]);
                if !protocol.does_dirty_sharing() && protocol.is_write_back_needed(prev) {
                    self.events.push((TbEvent::WriteBack, i));
                }
                flushed
            }
            BusMsg::BusReadX => protocol.on_bus_rd_x(&mut self.lines[i]),
            BusMsg::BusUpdate => protocol.on_bus_updt(&mut self.lines[i]),
            BusMsg::BusUpgrade => protocol.on_bus_upgr(&mut self.lines[i]),
            BusMsg::BusWrite => protocol.on_bus_wr(&mut self.lines[i]),
        }
    }

    fn reset(&mut self) {
        self.command = Command::None;
        self.events.clear();
        self.lines = [blank_line(); N_TEXTBOOK_LINES];
        // Restart the table
        self.print_separator();
        self.print_stats();
    }

    fn print_stats(&self) {
        let mut row = String::new();

        match self.command {
            Command::Evict(n) => row.push_str(&format!("E{}", n + 1)),
            Command::Read(n) => row.push_str(&format!("R{}", n + 1)),
            Command::Write(n) => row.push_str(&format!("W{}", n + 1)),
            Command::None => row.push_str(&" ".repeat(COL_OP)),
        }

        // The first event sits on the command row; the rest get
        // continuation rows with the sourcing cache called out
        let mut events = self.events.iter();
        match events.next() {
            None => row.push_str(&format!(" | {:<COL_EVENT$} | {:<COL_SOURCE$}", "", "")),
            Some(&(event, issuer)) => {
                let source = if issuer == N_TEXTBOOK_LINES { "Main Memory" } else { "" };
                row.push_str(&format!(
                    " | {:<COL_EVENT$} | {source:<COL_SOURCE$}",
                    event.name()
                ));
            }
        }
        for &(event, issuer) in events {
            row.push_str(" |\n");
            row.push_str(&format!(
                "{:<COL_OP$} |   {:<width$} | ",
                "",
                event.name(),
                width = COL_EVENT - 2
            ));
            if issuer == N_TEXTBOOK_LINES {
                row.push_str(&format!("{:<COL_SOURCE$}", "Main Memory"));
            } else if issuer != self.command_issuer() {
                row.push_str(&format!("P{:<width$}", issuer + 1, width = COL_SOURCE - 1));
            } else {
                row.push_str(&format!("{:<COL_SOURCE$}", ""));
            }
        }

        row.push_str(" |");
        for line in &self.lines {
            if line.tag != 0 {
                row.push_str(&format!(" {:<2}", line.state.name()));
            } else {
                row.push_str(" - ");
            }
        }
        println!("{row}");
    }
}

impl BusPort for CoherenceView {
    fn issue_bus_msg(&mut self, msg: BusMsg) -> bool {
        let issuer = self.command_issuer();
        self.events.push((TbEvent::Msg(msg), issuer));

        let mut copies = false;
        let mut flushed = false;
        for i in 0..N_TEXTBOOK_LINES {
            if i == issuer || !self.lines[i].state.is_valid() {
                continue;
            }
            if self.snoop(msg, i) {
                self.events.push((TbEvent::LineFlush, i));
                flushed = true;
            }
            copies = true;
        }

        // Data-bearing messages read the block from somewhere
        if matches!(msg, BusMsg::BusRead | BusMsg::BusReadX) {
            if flushed {
                self.events.push((TbEvent::CacheToCache, issuer));
            } else {
                self.events.push((TbEvent::LineFetch, N_TEXTBOOK_LINES));
            }
        }
        copies
    }
}

impl View for CoherenceView {
    fn eval(&mut self, cmd: &str) -> bool {
        let bytes = cmd.as_bytes();
        if bytes.len() == 1 && bytes[0].eq_ignore_ascii_case(&b'x') {
            self.reset();
            return true;
        }
        if bytes.len() == 2 && (b'1'..=b'0' + N_TEXTBOOK_LINES as u8).contains(&bytes[1]) {
            let n = (bytes[1] - b'1') as usize;
            match bytes[0] {
                b'e' | b'E' => self.receive_evict(n),
                b'r' | b'R' => self.receive_pr_rd(n),
                b'w' | b'W' => self.receive_pr_wr(n),
                _ => return false,
            }
            self.print_stats();
            return true;
        }
        false
    }

    fn print_format_message(&self) {
        eprintln!(
            "Command must be 'E', 'R', or 'W' followed by a number between 1 and {N_TEXTBOOK_LINES}, or 'X'"
        );
    }

    fn print_separator(&self) {
        println!(
            "{}-+-{}-+-{}-+-{}",
            "-".repeat(COL_OP),
            "-".repeat(COL_EVENT),
            "-".repeat(COL_SOURCE),
            "-".repeat(COL_STATES),
        );
    }
}

/// An unallocated textbook line. The tables use tag 0 as the "never
/// allocated" marker, unlike the real cache's all-ones sentinel.
fn blank_line() -> CacheLine {
    let mut line = CacheLine::empty();
    line.tag = 0;
    line
}

// ---------------------------------------------------------------------------
// Replacer view

/// Column widths for the replacer table.
const COL_ACCESS: usize = 8;
const COL_VICTIM: usize = 6;
const COL_TAGS: usize = 2 * N_TEXTBOOK_LINES - 1;
const COL_REP_STATE: usize = 15;

/// A single set of five ways driven by tag letters.
struct ReplacerView {
    kind: ReplacerKind,
    replacer: Replacer,
    lines: [CacheLine; N_TEXTBOOK_LINES],
    accessed: char,
    victim: char,
}

impl ReplacerView {
    fn new(kind: ReplacerKind) -> Self {
        let view = Self {
            kind,
            replacer: Replacer::new(kind, 1, N_TEXTBOOK_LINES),
            lines: [blank_line(); N_TEXTBOOK_LINES],
            accessed: ' ',
            victim: ' ',
        };
        println!(
            "{:<acc$} | {:<vic$} | {:<tags$} | Replacer State",
            "Accessed",
            "Victim",
            "Tags",
            acc = COL_ACCESS,
            vic = COL_VICTIM,
            tags = COL_TAGS,
        );
        view.print_separator();
        view.print_stats();
        view
    }

    fn access(&mut self, tag: u8) {
        self.accessed = tag as char;
        self.victim = ' ';

        let idx = match self.lines.iter().position(|line| line.tag == tag as u32) {
            Some(idx) => idx,
            None => {
                let idx = self.replacer.get_victim(0, &self.lines);
                if self.lines[idx].state.is_valid() {
                    self.victim = (self.lines[idx].tag as u8) as char;
                }
                self.lines[idx].tag = tag as u32;
                self.lines[idx].state = LineState::V;
                idx
            }
        };
        self.replacer.touch(0, idx);
    }

    fn reset(&mut self) {
        self.accessed = ' ';
        self.victim = ' ';
        self.replacer = Replacer::new(self.kind, 1, N_TEXTBOOK_LINES);
        self.lines = [blank_line(); N_TEXTBOOK_LINES];
        // Restart the table
        self.print_separator();
        self.print_stats();
    }

    fn print_stats(&self) {
        let tags: Vec<String> = self
            .lines
            .iter()
            .map(|line| {
                if line.state.is_valid() {
                    ((line.tag as u8) as char).to_string()
                } else {
                    "-".to_string()
                }
            })
            .collect();
        println!(
            "{:<COL_ACCESS$} | {:<COL_VICTIM$} | {} | {}",
            self.accessed,
            self.victim,
            tags.join(" "),
            self.replacer.fmt_state(0),
        );
    }
}

impl View for ReplacerView {
    fn eval(&mut self, cmd: &str) -> bool {
        let bytes = cmd.as_bytes();
        if bytes.len() != 1 {
            return false;
        }
        if bytes[0] == b'-' {
            self.reset();
            return true;
        }
        if bytes[0].is_ascii_alphabetic() {
            self.access(bytes[0].to_ascii_uppercase());
            self.print_stats();
            return true;
        }
        false
    }

    fn print_format_message(&self) {
        eprintln!("Command must be a letter between 'A' and 'Z' or '-'");
    }

    fn print_separator(&self) {
        println!(
            "{}-+-{}-+-{}-+-{}",
            "-".repeat(COL_ACCESS),
            "-".repeat(COL_VICTIM),
            "-".repeat(COL_TAGS),
            "-".repeat(COL_REP_STATE),
        );
    }
}
