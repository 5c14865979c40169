// THERMOBENCH CSV MODEL
// ORDERED COLUMN REGISTRY, SPARSE ROW BUFFER, ESCAPING AND ROW OUTPUT.
//
// COLUMNS ARE NEVER REMOVED. THE REGISTRY IS FROZEN BEFORE THE FIRST ROW
// IS BUILT, SO EVERY ROW SERIALIZES TO EXACTLY columns.len() FIELDS.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};

// POSITION OF A COLUMN IN THE OUTPUT. HEADERS LIVE IN Columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column(usize);

impl Column {
    pub fn order(self) -> usize {
        self.0
    }
}

#[derive(Default, Debug)]
pub struct Columns {
    headers: Vec<String>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    // APPEND A COLUMN. ASSIGNS THE NEXT SEQUENTIAL ORDER.
    pub fn add(&mut self, header: impl Into<String>) -> Column {
        self.headers.push(header.into());
        Column(self.headers.len() - 1)
    }

    pub fn find(&self, header: &str) -> Option<Column> {
        self.headers.iter().position(|h| h == header).map(Column)
    }

    // KEY COLUMNS ARE SHARED BY NAME BETWEEN STREAMS
    pub fn get_or_add(&mut self, header: &str) -> Column {
        match self.find(header) {
            Some(col) => col,
            None => self.add(header),
        }
    }

    pub fn header(&self, col: Column) -> &str {
        &self.headers[col.0]
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Column, &str)> {
        self.headers.iter().enumerate().map(|(i, h)| (Column(i), h.as_str()))
    }

    // THE HEADER LINE GOES THROUGH THE SAME ESCAPING AS DATA ROWS
    pub fn header_row(&self) -> Row {
        let mut row = Row::new(self);
        for (col, header) in self.iter() {
            row.set(col, header);
        }
        row
    }
}

// QUOTE FIELDS CONTAINING '"', ',', CR OR LF. EMBEDDED QUOTES ARE DOUBLED.
// EVERYTHING ELSE PASSES THROUGH UNTOUCHED (NO TRIMMING).
pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(&['"', ',', '\r', '\n'][..]) {
        return Cow::Borrowed(value);
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

// SHORTEST ROUND-TRIP REPRESENTATION: 45000.0 -> "45000", NAN -> "NaN"
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

#[derive(Clone, Debug)]
pub struct Row {
    fields: Vec<Option<String>>,
    empty: bool,
}

impl Row {
    pub fn new(columns: &Columns) -> Self {
        Self::with_width(columns.len())
    }

    pub fn with_width(width: usize) -> Self {
        Self {
            fields: vec![None; width],
            empty: true,
        }
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    // STORES THE ESCAPED FORM. GROWS THE ROW IF IT IS NARROWER THAN col.
    pub fn set(&mut self, col: Column, value: &str) {
        if col.0 >= self.fields.len() {
            self.fields.resize(col.0 + 1, None);
        }
        self.fields[col.0] = Some(escape(value).into_owned());
        self.empty = false;
    }

    pub fn set_number(&mut self, col: Column, value: f64) {
        self.set(col, &format_number(value));
    }

    pub fn is_set(&self, col: Column) -> bool {
        matches!(self.fields.get(col.0), Some(Some(_)))
    }

    // ESCAPED VALUE, "" WHEN UNSET
    pub fn get(&self, col: Column) -> &str {
        match self.fields.get(col.0) {
            Some(Some(v)) => v,
            _ => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn clear(&mut self) {
        for field in &mut self.fields {
            *field = None;
        }
        self.empty = true;
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if let Some(v) = field {
                f.write_str(v)?;
            }
        }
        f.write_str("\n")
    }
}

// ROW SINK OVER ANY WRITER. flush_each MAKES EVERY ROW VISIBLE IMMEDIATELY
// (TAILING THE FILE WHILE THE BENCHMARK RUNS).
pub struct CsvWriter<W: Write> {
    out: W,
    flush_each: bool,
    rows: u64,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W, flush_each: bool) -> Self {
        Self {
            out,
            flush_each,
            rows: 0,
        }
    }

    pub fn write_comment(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "# {}", text)?;
        if self.flush_each {
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn write_header(&mut self, header: &Row) -> io::Result<()> {
        write!(self.out, "{}", header)?;
        if self.flush_each {
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn write_row(&mut self, row: &Row) -> io::Result<()> {
        write!(self.out, "{}", row)?;
        self.rows += 1;
        if self.flush_each {
            self.out.flush()?;
        }
        Ok(())
    }

    // DATA ROWS ONLY (HEADER LINES ARE NOT COUNTED)
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_passes_plain_values() {
        assert_eq!(escape("45000"), "45000");
        assert_eq!(escape(" padded "), " padded ");
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn escape_quotes_specials() {
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("line\nbreak"), "\"line\nbreak\"");
        assert_eq!(escape("cr\r"), "\"cr\r\"");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(45000.0), "45000");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-3.25), "-3.25");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn set_grows_narrow_row() {
        let mut row = Row::with_width(1);
        row.set(Column(3), "x");
        assert_eq!(row.width(), 4);
        assert_eq!(row.to_string(), ",,,x\n");
    }

    #[test]
    fn get_or_add_reuses_header() {
        let mut cols = Columns::new();
        let a = cols.add("a");
        let b = cols.get_or_add("b");
        assert_eq!(cols.get_or_add("a"), a);
        assert_eq!(cols.get_or_add("b"), b);
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn header_row_is_escaped() {
        let mut cols = Columns::new();
        cols.add("time/ms");
        cols.add("a,b");
        assert_eq!(cols.header_row().to_string(), "time/ms,\"a,b\"\n");
    }

    #[test]
    fn writer_counts_rows() {
        let mut cols = Columns::new();
        let a = cols.add("a");
        let mut w = CsvWriter::new(Vec::new(), true);
        let mut row = Row::new(&cols);
        row.set(a, "1");
        w.write_comment("hello").unwrap();
        w.write_row(&row).unwrap();
        assert_eq!(w.rows(), 1);
        assert_eq!(String::from_utf8(w.into_inner()).unwrap(), "# hello\n1\n");
    }
}
