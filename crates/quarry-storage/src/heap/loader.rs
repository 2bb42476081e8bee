//! Text loader: converts delimited text into binary heap-file pages.
//!
//! Input is one record per line, fields separated by a configurable
//! character. Carriage returns are ignored, empty lines are skipped, and a
//! trailing record without a final newline is still committed. The output
//! is consecutive heap pages in the exact on-disk format of
//! [`HeapPage`](crate::heap::HeapPage); the final page is zero-padded, and
//! an empty input produces exactly one empty page.

use crate::heap::page::HeapPage;
use crate::tuple::{Tuple, TupleDesc};
use quarry_buffer::PAGE_SIZE;
use quarry_common::{set_slot, Field, FieldType, QuarryError, Result, STRING_LEN};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Converts a delimited text file into a binary heap file.
///
/// `types` gives the field type of each column; every line must have
/// exactly that many fields.
pub fn encode_csv_file(in_path: &Path, out_path: &Path, types: &[FieldType]) -> Result<()> {
    encode_csv_file_with_separator(in_path, out_path, types, ',')
}

/// Converts a delimited text file with an explicit field separator.
pub fn encode_csv_file_with_separator(
    in_path: &Path,
    out_path: &Path,
    types: &[FieldType],
    separator: char,
) -> Result<()> {
    let text = fs::read_to_string(in_path)?;
    let tuples = parse_records(&text, types, separator)?;
    write_heap_file(out_path, &TupleDesc::new(types.to_vec()), &tuples)
}

/// Converts in-memory integer rows into a binary heap file.
///
/// Every row must have `num_fields` values; the descriptor is all-INT.
pub fn encode_int_rows(rows: &[Vec<i32>], out_path: &Path, num_fields: usize) -> Result<()> {
    let desc = TupleDesc::int_fields(num_fields);
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != num_fields {
            return Err(QuarryError::IllegalArgument(format!(
                "row has {} fields, expected {}",
                row.len(),
                num_fields
            )));
        }
        tuples.push(Tuple::from_ints(row));
    }
    write_heap_file(out_path, &desc, &tuples)
}

/// Parses the text into tuples, honoring the loader's line rules.
fn parse_records(text: &str, types: &[FieldType], separator: char) -> Result<Vec<Tuple>> {
    let desc = TupleDesc::new(types.to_vec());
    let mut tuples = Vec::new();

    for line in text.split('\n') {
        let line: String = line.chars().filter(|&c| c != '\r').collect();
        if line.is_empty() {
            continue;
        }

        let raw_fields: Vec<&str> = line.split(separator).collect();
        if raw_fields.len() != types.len() {
            return Err(QuarryError::IllegalArgument(format!(
                "line has {} fields, expected {}: {:?}",
                raw_fields.len(),
                types.len(),
                line
            )));
        }

        let mut fields = Vec::with_capacity(types.len());
        for (raw, ty) in raw_fields.iter().zip(types) {
            let trimmed = raw.trim();
            match ty {
                FieldType::Int => {
                    let v: i32 = trimmed.parse().map_err(|_| {
                        QuarryError::IllegalArgument(format!("bad integer field: {:?}", trimmed))
                    })?;
                    fields.push(Field::Int(v));
                }
                FieldType::Str => {
                    let mut end = trimmed.len().min(STRING_LEN);
                    while !trimmed.is_char_boundary(end) {
                        end -= 1;
                    }
                    fields.push(Field::Str(trimmed[..end].to_string()));
                }
            }
        }
        tuples.push(Tuple::new(desc.clone(), fields)?);
    }

    Ok(tuples)
}

/// Writes tuples as consecutive binary heap pages.
fn write_heap_file(out_path: &Path, desc: &TupleDesc, tuples: &[Tuple]) -> Result<()> {
    let slots_per_page = HeapPage::num_slots_for(desc);
    let header_size = HeapPage::header_size_for(desc);
    let mut out = fs::File::create(out_path)?;

    let mut chunks: Vec<&[Tuple]> = tuples.chunks(slots_per_page).collect();
    if chunks.is_empty() {
        // Zero input tuples still emit one empty page.
        chunks.push(&[]);
    }

    for chunk in chunks {
        let mut page = Vec::with_capacity(PAGE_SIZE);

        let mut header = vec![0u8; header_size];
        for i in 0..chunk.len() {
            set_slot(&mut header, i);
        }
        page.extend_from_slice(&header);

        for t in chunk {
            t.write_to(&mut page);
        }
        page.resize(PAGE_SIZE, 0);
        out.write_all(&page)?;
    }

    out.flush()?;
    Ok(())
}
