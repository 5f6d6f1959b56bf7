//! The `#~` stream: header, row counts and the rows of every present table.
//!
//! Rows are held as plain cell values, one `u32` per column, so the stream can be re-encoded
//! with different index widths after rows are appended.

use strum::IntoEnumIterator;

use crate::{
    file::io::{push_le, read_le_at},
    image::pe::schema::{columns, Column, Widths, TABLE_COUNT},
    metadata::token::TableId,
    Error, Result,
};

/// The rows of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Table {
    width: usize,
    cells: Vec<u32>,
}

impl Table {
    fn new(table: TableId) -> Self {
        Table {
            width: columns(table).len(),
            cells: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.cells.len() / self.width
        }
    }

    /// Cells of the 0-based `index`
    pub(crate) fn row(&self, index: usize) -> Option<&[u32]> {
        let start = index.checked_mul(self.width)?;
        self.cells.get(start..start + self.width)
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.cells.chunks_exact(self.width.max(1))
    }
}

/// A decoded `#~` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TablesStream {
    pub(crate) major: u8,
    pub(crate) minor: u8,
    pub(crate) heap_sizes: u8,
    valid: u64,
    sorted: u64,
    extra: Option<u32>,
    tables: Vec<Table>,
}

fn table_ids() -> impl Iterator<Item = TableId> {
    TableId::iter().filter(|table| table.is_table())
}

impl TablesStream {
    /// An empty stream of schema 2.0.
    pub(crate) fn new() -> Self {
        TablesStream {
            major: 2,
            minor: 0,
            heap_sizes: 0,
            valid: 0,
            sorted: 0x0000_1600_3301_FA00,
            extra: None,
            tables: table_ids().map(Table::new).collect(),
        }
    }

    /// Decode a `#~` stream.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for tables outside the ECMA-335 set, and
    /// [`Error::OutOfBounds`] for a truncated stream.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut offset = 4;
        let major = read_le_at::<u8>(data, &mut offset)?;
        let minor = read_le_at::<u8>(data, &mut offset)?;
        let heap_sizes = read_le_at::<u8>(data, &mut offset)?;
        offset += 1;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> TABLE_COUNT != 0 {
            return Err(Error::NotSupported);
        }

        let mut rows = [0_u32; TABLE_COUNT];
        for (slot, count) in rows.iter_mut().enumerate() {
            if valid & (1 << slot) != 0 {
                *count = read_le_at::<u32>(data, &mut offset)?;
            }
        }
        let extra = if heap_sizes & 0x40 != 0 {
            Some(read_le_at::<u32>(data, &mut offset)?)
        } else {
            None
        };

        let widths = Widths::new(rows, heap_sizes);
        let mut tables = Vec::with_capacity(TABLE_COUNT);
        for table in table_ids() {
            let row_count = rows[table as usize] as usize;
            if row_count.saturating_mul(widths.row(table)) > data.len().saturating_sub(offset) {
                return Err(Error::OutOfBounds);
            }

            let layout = columns(table);
            let mut decoded = Table::new(table);
            decoded.cells.reserve(row_count * layout.len());
            for _ in 0..row_count {
                for column in layout {
                    let value = match widths.column(*column) {
                        2 => u32::from(read_le_at::<u16>(data, &mut offset)?),
                        _ => read_le_at::<u32>(data, &mut offset)?,
                    };
                    decoded.cells.push(value);
                }
            }
            tables.push(decoded);
        }

        Ok(TablesStream {
            major,
            minor,
            heap_sizes,
            valid,
            sorted,
            extra,
            tables,
        })
    }

    pub(crate) fn table(&self, table: TableId) -> &Table {
        &self.tables[table as usize]
    }

    pub(crate) fn row_count(&self, table: TableId) -> usize {
        self.table(table).len()
    }

    /// Cells of the 1-based `row` of `table`
    pub(crate) fn row(&self, table: TableId, row: u32) -> Option<&[u32]> {
        let index = (row as usize).checked_sub(1)?;
        self.table(table).row(index)
    }

    /// Append a row and return its 1-based row number.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the cell count does not match the table's columns.
    pub(crate) fn push_row(&mut self, table: TableId, cells: &[u32]) -> Result<u32> {
        let target = &mut self.tables[table as usize];
        if cells.len() != target.width || target.width == 0 {
            return Err(malformed_error!(
                "{} rows have {} columns, got {}",
                table,
                target.width,
                cells.len()
            ));
        }
        target.cells.extend_from_slice(cells);
        self.valid |= 1 << (table as u8);
        u32::try_from(target.len()).map_err(|_| malformed_error!("Too many {} rows", table))
    }

    /// Overwrite one cell of the 1-based `row` of `table`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for a missing row or column.
    pub(crate) fn set(
        &mut self,
        table: TableId,
        row: u32,
        column: usize,
        value: u32,
    ) -> Result<()> {
        let target = &mut self.tables[table as usize];
        if column >= target.width {
            return Err(Error::OutOfBounds);
        }
        let index = (row as usize).checked_sub(1).ok_or(Error::OutOfBounds)?;
        let cell = target
            .cells
            .get_mut(index * target.width + column)
            .ok_or(Error::OutOfBounds)?;
        *cell = value;
        Ok(())
    }

    fn row_counts(&self) -> [u32; TABLE_COUNT] {
        let mut rows = [0_u32; TABLE_COUNT];
        for (slot, table) in rows.iter_mut().zip(&self.tables) {
            *slot = u32::try_from(table.len()).unwrap_or(u32::MAX);
        }
        rows
    }

    /// Encode the stream; `heap_sizes` overrides the heap index width flags.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if a cell does not fit its column width.
    pub(crate) fn encode(&self, heap_sizes: u8) -> Result<Vec<u8>> {
        let heap_sizes = (self.heap_sizes & !0x07) | (heap_sizes & 0x07);
        let rows = self.row_counts();
        let widths = Widths::new(rows, heap_sizes);

        let mut out = Vec::new();
        push_le(&mut out, 0_u32);
        push_le(&mut out, self.major);
        push_le(&mut out, self.minor);
        push_le(&mut out, heap_sizes);
        push_le(&mut out, 1_u8);
        push_le(&mut out, self.valid);
        push_le(&mut out, self.sorted);
        for (slot, count) in rows.iter().enumerate() {
            if self.valid & (1 << slot) != 0 {
                push_le(&mut out, *count);
            }
        }
        if let Some(extra) = self.extra {
            push_le(&mut out, extra);
        }

        for (table, decoded) in table_ids().zip(&self.tables) {
            let layout: &[Column] = columns(table);
            for row in decoded.rows() {
                for (column, value) in layout.iter().zip(row) {
                    if widths.column(*column) == 2 {
                        let narrow = u16::try_from(*value).map_err(|_| {
                            malformed_error!("{} cell {:#x} exceeds a 2-byte column", table, value)
                        })?;
                        push_le(&mut out, narrow);
                    } else {
                        push_le(&mut out, *value);
                    }
                }
            }
        }

        while out.len() % 4 != 0 {
            out.push(0);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TablesStream {
        let mut stream = TablesStream::new();
        stream.push_row(TableId::Module, &[0, 1, 1, 0, 0]).unwrap();
        stream.push_row(TableId::TypeRef, &[0x06, 10, 20]).unwrap();
        stream
            .push_row(TableId::MemberRef, &[(1 << 3) | 1, 30, 1])
            .unwrap();
        stream
    }

    #[test]
    fn encode_then_parse() {
        let stream = sample();
        let bytes = stream.encode(0).unwrap();
        // header 24, three row counts, rows 10 + 6 + 6
        assert_eq!(bytes.len(), 24 + 12 + 22 + 2);

        let parsed = TablesStream::parse(&bytes).unwrap();
        assert_eq!(parsed.row_count(TableId::TypeRef), 1);
        assert_eq!(parsed.row(TableId::MemberRef, 1), Some(&[(1 << 3) | 1, 30, 1][..]));
        assert_eq!(parsed.row(TableId::MemberRef, 2), None);
        assert_eq!(parsed.row(TableId::MemberRef, 0), None);
    }

    #[test]
    fn wide_heaps_widen_columns() {
        let stream = sample();
        let narrow = stream.encode(0).unwrap();
        let wide = stream.encode(0x01).unwrap();
        // Module has one string column, TypeRef two, MemberRef one
        assert_eq!(wide.len() - narrow.len(), 8);
        let parsed = TablesStream::parse(&wide).unwrap();
        assert_eq!(parsed.heap_sizes & 0x01, 0x01);
        assert_eq!(parsed.row(TableId::TypeRef, 1), Some(&[0x06, 10, 20][..]));
    }

    #[test]
    fn narrow_columns_reject_large_values() {
        let mut stream = sample();
        stream.set(TableId::TypeRef, 1, 1, 0x1_0000).unwrap();
        assert!(stream.encode(0).is_err());
        assert!(stream.encode(0x01).is_ok());
        assert!(stream.set(TableId::TypeRef, 2, 1, 0).is_err());
        assert!(stream.set(TableId::TypeRef, 1, 3, 0).is_err());
        assert!(stream.push_row(TableId::TypeRef, &[1, 2]).is_err());
    }

    #[test]
    fn rejects_unknown_tables_and_truncation() {
        let mut bytes = sample().encode(0).unwrap();
        let parsed = TablesStream::parse(&bytes[..bytes.len() - 6]);
        assert!(matches!(parsed, Err(Error::OutOfBounds)));

        // Set valid bit 0x30 (a portable PDB table)
        bytes[8 + 6] |= 0x01;
        assert!(matches!(TablesStream::parse(&bytes), Err(Error::NotSupported)));
    }
}
