//! Column-indexed multiple alignments.

use physalia_core::{PhysaliaError, Result};

/// An aligned set of sequences: each column holds, per taxon, either a
/// letter index or a gap.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// `columns[c][t]` is the entry for taxon `t` in column `c`.
    columns: Vec<Vec<Option<usize>>>,
    n_taxa: usize,
}

impl Alignment {
    /// Build from per-taxon rows of equal length.
    pub fn from_rows(rows: &[Vec<Option<usize>>]) -> Result<Self> {
        if rows.is_empty() {
            return Err(PhysaliaError::InvalidInput("no taxa".into()));
        }
        let n_columns = rows[0].len();
        for (t, row) in rows.iter().enumerate() {
            if row.len() != n_columns {
                return Err(PhysaliaError::InvalidInput(format!(
                    "row {t} has {} columns, expected {n_columns}",
                    row.len()
                )));
            }
        }
        let columns = (0..n_columns)
            .map(|c| rows.iter().map(|row| row[c]).collect())
            .collect();
        Ok(Alignment {
            columns,
            n_taxa: rows.len(),
        })
    }

    /// Parse rows of letters with `-` as the gap character, mapping
    /// letters through the given alphabet string (e.g. `"ACGT"`).
    pub fn from_strings(rows: &[&str], letters: &str) -> Result<Self> {
        let parsed: Vec<Vec<Option<usize>>> = rows
            .iter()
            .map(|row| {
                row.chars()
                    .map(|ch| {
                        if ch == '-' {
                            Ok(None)
                        } else {
                            letters
                                .find(ch)
                                .map(Some)
                                .ok_or_else(|| PhysaliaError::InvalidInput(format!(
                                    "letter '{ch}' is not in the alphabet"
                                )))
                        }
                    })
                    .collect()
            })
            .collect::<Result<_>>()?;
        Alignment::from_rows(&parsed)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_taxa(&self) -> usize {
        self.n_taxa
    }

    /// The letter (or gap) for one taxon in one column.
    pub fn entry(&self, column: usize, taxon: usize) -> Result<Option<usize>> {
        if column >= self.columns.len() {
            return Err(PhysaliaError::index("column", column, self.columns.len()));
        }
        if taxon >= self.n_taxa {
            return Err(PhysaliaError::index("taxon", taxon, self.n_taxa));
        }
        Ok(self.columns[column][taxon])
    }

    /// One column, all taxa.
    pub fn column(&self, column: usize) -> Result<&[Option<usize>]> {
        self.columns
            .get(column)
            .map(Vec::as_slice)
            .ok_or_else(|| PhysaliaError::index("column", column, self.columns.len()))
    }

    /// The ungapped sequence of one taxon.
    pub fn sequence(&self, taxon: usize) -> Result<Vec<usize>> {
        if taxon >= self.n_taxa {
            return Err(PhysaliaError::index("taxon", taxon, self.n_taxa));
        }
        Ok(self
            .columns
            .iter()
            .filter_map(|col| col[taxon])
            .collect())
    }
}
