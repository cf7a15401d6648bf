use bytes::Bytes;

/// Memoized row and column filter verdicts for one scan.
///
/// Cells arrive grouped by row and then by column, so remembering the most
/// recent verdict of each kind turns a pattern evaluation per cell into one
/// per distinct row or column.
#[derive(Debug, Default)]
pub struct RegexpFilterCache {
    row: Option<(Bytes, bool)>,
    column: Option<(u16, Bytes, bool)>,
}

impl RegexpFilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached verdict for `row`, if it was the last row evaluated.
    pub fn check_row(&self, row: &[u8]) -> Option<bool> {
        match &self.row {
            Some((cached, matched)) if cached.as_ref() == row => Some(*matched),
            _ => None,
        }
    }

    pub fn set_row(&mut self, row: Bytes, matched: bool) {
        self.row = Some((row, matched));
    }

    /// Cached verdict for the `(family, qualifier)` column.
    pub fn check_column(&self, column_family_code: u16, qualifier: &[u8]) -> Option<bool> {
        match &self.column {
            Some((cf, cached, matched))
                if *cf == column_family_code && cached.as_ref() == qualifier =>
            {
                Some(*matched)
            }
            _ => None,
        }
    }

    pub fn set_column(&mut self, column_family_code: u16, qualifier: Bytes, matched: bool) {
        self.column = Some((column_family_code, qualifier, matched));
    }

    /// Evaluate `eval` for `row` unless the verdict is cached.
    pub fn row_matches(&mut self, row: &Bytes, eval: impl FnOnce(&[u8]) -> bool) -> bool {
        if let Some(matched) = self.check_row(row) {
            return matched;
        }
        let matched = eval(row);
        self.set_row(row.clone(), matched);
        matched
    }

    /// Evaluate `eval` for the column unless the verdict is cached.
    pub fn column_matches(
        &mut self,
        column_family_code: u16,
        qualifier: &Bytes,
        eval: impl FnOnce(&[u8]) -> bool,
    ) -> bool {
        if let Some(matched) = self.check_column(column_family_code, qualifier) {
            return matched;
        }
        let matched = eval(qualifier);
        self.set_column(column_family_code, qualifier.clone(), matched);
        matched
    }
}
