// THERMOBENCH CSV MODEL TESTS
// ROW WIDTH, ESCAPING ROUND-TRIP, CLEAR SEMANTICS, HEADER LAYOUT
//
// PURE IN-MEMORY. RUN OFFLINE.

use thermobench::csv::{escape, Columns, CsvWriter, Row};

// MINIMAL RFC 4180 READER FOR ONE RECORD (QUOTED FIELDS MAY HOLD CR/LF)
fn parse_record(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => quoted = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\n' => break,
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn columns(n: usize) -> Columns {
    let mut cols = Columns::new();
    for i in 0..n {
        cols.add(format!("c{}", i));
    }
    cols
}

// === COLUMN WIDTH ===

#[test]
fn every_row_has_one_field_per_column() {
    let cols = columns(5);
    let ids: Vec<_> = cols.iter().map(|(c, _)| c).collect();
    let mut row = Row::new(&cols);

    for set in [vec![], vec![0], vec![4], vec![1, 3], vec![0, 1, 2, 3, 4]] {
        row.clear();
        for &i in &set {
            row.set(ids[i], "v");
        }
        let record = parse_record(&row.to_string());
        assert_eq!(record.len(), 5, "row with {:?} set", set);
    }
}

#[test]
fn special_values_do_not_change_width() {
    let cols = columns(3);
    let ids: Vec<_> = cols.iter().map(|(c, _)| c).collect();
    let mut row = Row::new(&cols);
    row.set(ids[1], "a,b,\"c\"\r\nd");
    let record = parse_record(&row.to_string());
    assert_eq!(record.len(), 3);
    assert_eq!(record[1], "a,b,\"c\"\r\nd");
}

// === ESCAPING ===

#[test]
fn escaping_round_trips() {
    let samples = [
        "",
        "plain",
        "\"",
        "\"\"",
        ",",
        "\r",
        "\n",
        "\r\n",
        "a\"b,c\nd\re",
        "\",\"",
        "trailing quote\"",
        "\"leading quote",
        "°C, 45000",
    ];
    for s in samples {
        let escaped = escape(s);
        let record = parse_record(&escaped);
        assert_eq!(record, vec![s.to_string()], "escaped form {:?}", escaped);
    }
}

#[test]
fn plain_values_are_not_quoted() {
    assert_eq!(escape("45000"), "45000");
    assert_eq!(escape("temp_zone/°C"), "temp_zone/°C");
}

// === CLEAR ===

#[test]
fn clear_yields_empty_fields() {
    let cols = columns(4);
    let ids: Vec<_> = cols.iter().map(|(c, _)| c).collect();
    let mut row = Row::new(&cols);
    assert!(row.is_empty());

    row.set(ids[2], "x");
    assert!(!row.is_empty());
    row.clear();
    assert!(row.is_empty());
    assert_eq!(row.to_string(), ",,,\n");

    // CLEARING TWICE CHANGES NOTHING
    row.clear();
    assert_eq!(row.to_string(), ",,,\n");

    row.set_number(ids[0], 1.5);
    assert!(!row.is_empty());
}

// === WRITER ===

#[test]
fn header_then_rows() {
    let mut cols = Columns::new();
    let time = cols.add("time/ms");
    let temp = cols.add("temp_zone/°C");
    let mut w = CsvWriter::new(Vec::new(), false);
    w.write_comment("Started at: now").unwrap();
    w.write_header(&cols.header_row()).unwrap();

    let mut row = Row::new(&cols);
    row.set_number(time, 0.0);
    row.set_number(temp, 45000.0);
    w.write_row(&row).unwrap();
    row.clear();
    row.set_number(time, 100.0);
    row.set_number(temp, f64::NAN);
    w.write_row(&row).unwrap();

    assert_eq!(w.rows(), 2);
    let text = String::from_utf8(w.into_inner()).unwrap();
    assert_eq!(text, "# Started at: now\ntime/ms,temp_zone/°C\n0,45000\n100,NaN\n");
}
