// STDOUT DEMULTIPLEXER
// TURNS A CHILD'S RAW STDOUT INTO (COLUMN, VALUE) PAIRS AND STDOUT-DRIVEN ROWS.
//
// PER LINE:
//   1. "KEY=value" WITH A BOUND KEY       -> value INTO KEY'S COLUMN
//   2. OTHERWISE, CATCH-ALL BOUND         -> WHOLE LINE INTO THE CATCH-ALL
//   3. OTHERWISE                          -> DROPPED
//
// IMMEDIATE COLUMNS GO INTO THE PENDING ROW. A COLUMN THAT IS ALREADY SET
// FLUSHES THE ROW FIRST, SO NO VALUE IS EVER OVERWRITTEN. THE PENDING ROW IS
// FLUSHED AT THE END OF EVERY READ BATCH.
// SYNCHRONOUS COLUMNS ONLY CACHE THE LAST VALUE FOR THE NEXT PERIODIC SAMPLE.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::config::ConfigError;
use crate::csv::{Column, Columns, CsvWriter, Row};
use crate::lines::LineFramer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Immediate(Column),
    Synchronous(Column),
}

impl Binding {
    pub fn new(column: Column, synchronous: bool) -> Self {
        if synchronous {
            Binding::Synchronous(column)
        } else {
            Binding::Immediate(column)
        }
    }

    pub fn column(self) -> Column {
        match self {
            Binding::Immediate(c) | Binding::Synchronous(c) => c,
        }
    }

    pub fn is_synchronous(self) -> bool {
        matches!(self, Binding::Synchronous(_))
    }
}

#[derive(Debug, Default)]
pub struct KeyMap {
    keys: HashMap<String, Binding>,
    catch_all: Option<Binding>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_key(&mut self, key: &str, binding: Binding) {
        self.keys.insert(key.to_string(), binding);
    }

    pub fn bind_catch_all(&mut self, name: &str, binding: Binding) -> Result<(), ConfigError> {
        if self.catch_all.is_some() {
            return Err(ConfigError::DuplicateCatchAll(name.to_string()));
        }
        self.catch_all = Some(binding);
        Ok(())
    }

    // SPLIT AT THE FIRST '='. UNKNOWN KEYS FALL THROUGH TO THE CATCH-ALL.
    pub fn resolve<'l>(&self, line: &'l str) -> Option<(Binding, &'l str)> {
        if let Some((key, value)) = line.split_once('=') {
            if let Some(&binding) = self.keys.get(key) {
                return Some((binding, value));
            }
        }
        self.catch_all.map(|binding| (binding, line))
    }

    pub fn bindings(&self) -> impl Iterator<Item = Binding> + '_ {
        self.keys.values().copied().chain(self.catch_all)
    }

    pub fn has_synchronous(&self) -> bool {
        self.bindings().any(Binding::is_synchronous)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.catch_all.is_none()
    }
}

// LAST VALUE PER SYNCHRONOUS COLUMN SINCE THE PREVIOUS SAMPLE. LAST WRITE
// WINS, EVEN ACROSS STREAMS SHARING A COLUMN.
#[derive(Debug, Default)]
pub struct SyncCache {
    values: HashMap<Column, String>,
}

impl SyncCache {
    pub fn store(&mut self, column: Column, value: &str) {
        self.values.insert(column, value.to_string());
    }

    pub fn get(&self, column: Column) -> Option<&str> {
        self.values.get(&column).map(String::as_str)
    }

    // MOVE EVERY CACHED VALUE INTO row AND FORGET THEM
    pub fn take_into(&mut self, row: &mut Row) {
        for (column, value) in self.values.drain() {
            row.set(column, &value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// THE ROW BEING ASSEMBLED FROM STDOUT EVENTS, SHARED BY ALL STREAMS
pub struct StdoutRows {
    row: Row,
    time: Column,
    sync: SyncCache,
}

impl StdoutRows {
    pub fn new(columns: &Columns, time: Column) -> Self {
        Self {
            row: Row::new(columns),
            time,
            sync: SyncCache::default(),
        }
    }

    pub fn put<W: Write>(
        &mut self,
        binding: Binding,
        value: &str,
        now_ms: u64,
        out: &mut CsvWriter<W>,
    ) -> io::Result<()> {
        match binding {
            Binding::Synchronous(column) => self.sync.store(column, value),
            Binding::Immediate(column) => {
                if self.row.is_set(column) {
                    self.flush(out)?;
                }
                if self.row.is_empty() {
                    self.row.set_number(self.time, now_ms as f64);
                }
                self.row.set(column, value);
            }
        }
        Ok(())
    }

    pub fn flush<W: Write>(&mut self, out: &mut CsvWriter<W>) -> io::Result<()> {
        if !self.row.is_empty() {
            log::debug!("stdout row: {}", self.row.to_string().trim_end());
            out.write_row(&self.row)?;
            self.row.clear();
        }
        Ok(())
    }

    pub fn sync_mut(&mut self) -> &mut SyncCache {
        &mut self.sync
    }
}

// ONE PER CHILD STDOUT
#[derive(Debug)]
pub struct StreamDemux {
    framer: LineFramer,
    keys: KeyMap,
}

impl StreamDemux {
    pub fn new(keys: KeyMap) -> Self {
        Self {
            framer: LineFramer::new(),
            keys,
        }
    }

    // ONE I/O-READY NOTIFICATION: READ ALL AVAILABLE BYTES, DISPATCH EVERY
    // COMPLETE LINE, FLUSH THE PENDING ROW. RETURNS TRUE AT END OF STREAM.
    // ERRORS ARE OUTPUT (CSV WRITE) ERRORS ONLY.
    pub fn read_batch<R: Read, W: Write>(
        &mut self,
        src: &mut R,
        rows: &mut StdoutRows,
        now_ms: u64,
        out: &mut CsvWriter<W>,
    ) -> io::Result<bool> {
        // A BROKEN PIPE ENDS THE STREAM, NOT THE MEASUREMENT
        let eof = match self.framer.fill_from(src) {
            Ok(outcome) => outcome.eof,
            Err(e) => {
                log::warn!("stdout read error: {}", e);
                true
            }
        };
        self.dispatch_lines(rows, now_ms, out)?;
        if eof {
            if let Some(rest) = self.framer.take_partial() {
                self.dispatch(&rest, rows, now_ms, out)?;
            }
        }
        rows.flush(out)?;
        Ok(eof)
    }

    // SAME AS read_batch FOR BYTES ALREADY IN HAND
    pub fn feed<W: Write>(
        &mut self,
        bytes: &[u8],
        rows: &mut StdoutRows,
        now_ms: u64,
        out: &mut CsvWriter<W>,
    ) -> io::Result<()> {
        self.framer.extend(bytes);
        self.dispatch_lines(rows, now_ms, out)?;
        rows.flush(out)
    }

    fn dispatch_lines<W: Write>(
        &mut self,
        rows: &mut StdoutRows,
        now_ms: u64,
        out: &mut CsvWriter<W>,
    ) -> io::Result<()> {
        while let Some(line) = self.framer.next_line() {
            self.dispatch(&line, rows, now_ms, out)?;
        }
        Ok(())
    }

    fn dispatch<W: Write>(
        &self,
        line: &str,
        rows: &mut StdoutRows,
        now_ms: u64,
        out: &mut CsvWriter<W>,
    ) -> io::Result<()> {
        match self.keys.resolve(line) {
            Some((binding, value)) => rows.put(binding, value, now_ms, out),
            None => Ok(()),
        }
    }
}
