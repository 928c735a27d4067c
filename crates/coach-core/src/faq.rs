//! The FAQ corpus: question/answer pairs loaded from CSV.
//!
//! Rows are renumbered to a dense 0-based sequence when the corpus is built, so an
//! entry's `id` is always its position. Columns other than the question and answer
//! fields are carried through untouched and written back out with the bundle.

use std::io::Read;
use std::path::{Path, PathBuf};

/// Column names used in the persisted corpus artifact.
pub const QUESTION_COLUMN: &str = "question";
pub const ANSWER_COLUMN: &str = "answer";

/// Raw tabular text as read from a CSV file (header row + string records).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaqTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FaqTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a CSV file with a header row.
    pub fn from_csv_path(path: &Path) -> Result<Self, FaqError> {
        let file = std::fs::File::open(path).map_err(|e| FaqError::Open(path.to_path_buf(), e))?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, FaqError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// One question/answer pair. Immutable once the corpus is built.
#[derive(Debug, Clone, PartialEq)]
pub struct FaqEntry {
    /// Position in the corpus (0..n-1).
    pub id: usize,
    pub question: String,
    pub answer: String,
    /// Passthrough values, aligned with [`FaqCorpus::extra_columns`].
    pub extra: Vec<String>,
}

/// Ordered, finite sequence of FAQ entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaqCorpus {
    extra_columns: Vec<String>,
    entries: Vec<FaqEntry>,
}

impl FaqCorpus {
    /// Build a corpus from question/answer pairs with no passthrough columns.
    pub fn from_pairs<Q, A>(pairs: impl IntoIterator<Item = (Q, A)>) -> Self
    where
        Q: Into<String>,
        A: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .enumerate()
            .map(|(id, (q, a))| FaqEntry {
                id,
                question: q.into(),
                answer: a.into(),
                extra: Vec::new(),
            })
            .collect();
        Self {
            extra_columns: Vec::new(),
            entries,
        }
    }

    /// Select the question and answer fields from `table`. Every other column is
    /// kept as passthrough, except stray `question`/`answer` columns that would
    /// collide with the persisted header.
    pub fn from_table(
        table: &FaqTable,
        question_field: &str,
        answer_field: &str,
    ) -> Result<Self, SchemaError> {
        let missing: Vec<String> = [question_field, answer_field]
            .into_iter()
            .filter(|f| table.column(f).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError { missing });
        }
        let q_col = table.column(question_field).unwrap_or_default();
        let a_col = table.column(answer_field).unwrap_or_default();

        let extra_cols: Vec<usize> = (0..table.headers.len())
            .filter(|&i| i != q_col && i != a_col)
            .filter(|&i| {
                let h = table.headers[i].as_str();
                h != QUESTION_COLUMN && h != ANSWER_COLUMN
            })
            .collect();

        let cell = |row: &[String], i: usize| row.get(i).cloned().unwrap_or_default();
        let entries = table
            .rows
            .iter()
            .enumerate()
            .map(|(id, row)| FaqEntry {
                id,
                question: cell(row, q_col),
                answer: cell(row, a_col),
                extra: extra_cols.iter().map(|&i| cell(row, i)).collect(),
            })
            .collect();

        Ok(Self {
            extra_columns: extra_cols.iter().map(|&i| table.headers[i].clone()).collect(),
            entries,
        })
    }

    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }

    pub fn get(&self, id: usize) -> Option<&FaqEntry> {
        self.entries.get(id)
    }

    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    pub fn questions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.question.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write as CSV: `question`, `answer`, then passthrough columns.
    pub fn write_csv(&self, path: &Path) -> Result<(), FaqError> {
        let mut wtr = csv::Writer::from_path(path)?;
        let mut header = vec![QUESTION_COLUMN.to_string(), ANSWER_COLUMN.to_string()];
        header.extend(self.extra_columns.iter().cloned());
        wtr.write_record(&header)?;
        for e in &self.entries {
            let mut record = vec![e.question.as_str(), e.answer.as_str()];
            record.extend(e.extra.iter().map(String::as_str));
            wtr.write_record(&record)?;
        }
        wtr.flush().map_err(|e| FaqError::Write(path.to_path_buf(), e))
    }

    /// Read a corpus previously written by [`FaqCorpus::write_csv`].
    pub fn read_csv(path: &Path) -> Result<Self, FaqError> {
        let table = FaqTable::from_csv_path(path)?;
        Ok(Self::from_table(&table, QUESTION_COLUMN, ANSWER_COLUMN)?)
    }
}

/// Required fields are missing from the FAQ table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("FAQ data is missing required field(s): {}", missing.join(", "))]
pub struct SchemaError {
    pub missing: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FaqError {
    #[error("failed to open {0}: {1}")]
    Open(PathBuf, #[source] std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> FaqTable {
        FaqTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn from_table_renumbers_and_keeps_passthrough() {
        let t = table(concat!(
            "id,question,answer,topic\n",
            "17,What is BMI?,Body mass index.,basics\n",
            "42,How much protein?,About 1.6 g/kg.,nutrition\n",
        ));
        let c = FaqCorpus::from_table(&t, "question", "answer").unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.entries()[0].id, 0);
        assert_eq!(c.entries()[1].id, 1);
        assert_eq!(c.entries()[1].answer, "About 1.6 g/kg.");
        assert_eq!(c.extra_columns(), ["id", "topic"]);
        assert_eq!(c.entries()[0].extra, ["17", "basics"]);
    }

    #[test]
    fn missing_csv_keeps_io_cause() {
        let dir = tempfile::tempdir().unwrap();
        let err = FaqTable::from_csv_path(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, FaqError::Open(..)));
        let cause = std::error::Error::source(&err).unwrap();
        assert!(cause.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn from_table_lists_every_missing_field() {
        let t = table("q,a\nx,y\n");
        let err = FaqCorpus::from_table(&t, "question", "answer").unwrap_err();
        assert_eq!(err.missing, ["question", "answer"]);

        let t = table("question,reply\nx,y\n");
        let err = FaqCorpus::from_table(&t, "question", "answer").unwrap_err();
        assert_eq!(err.missing, ["answer"]);
        assert!(err.to_string().contains("answer"));
    }

    #[test]
    fn custom_fields_are_written_under_standard_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faq.csv");
        let t = table("q,a,lang\n\"Rest days, how many?\",Two per week.,en\n");
        let c = FaqCorpus::from_table(&t, "q", "a").unwrap();
        c.write_csv(&path).unwrap();

        let back = FaqCorpus::read_csv(&path).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.entries()[0].question, "Rest days, how many?");
    }

    #[test]
    fn empty_table_gives_empty_corpus() {
        let t = table("question,answer\n");
        let c = FaqCorpus::from_table(&t, "question", "answer").unwrap();
        assert!(c.is_empty());
    }
}
