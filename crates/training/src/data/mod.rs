//! JSON-lines document datasets and padded batching.
//!
//! Every line holds one document: `{"sentences": [[ids...], ...], "label": 0}`.
//! Sentences are truncated or zero-padded to `max_seq` when loading; the
//! sentence axis is padded per batch to the longest document in that batch.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use candle_core::{Device, Tensor};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Deserialize;

use crate::TrainingError;

/// Result alias for data pipeline fallible operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Deserialize)]
struct DocumentRecord {
    sentences: Vec<Vec<u32>>,
    #[serde(default)]
    label: Option<f32>,
}

/// One document with sentences already fitted to `max_seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Each row has exactly `max_seq` ids.
    pub sentences: Vec<Vec<u32>>,
    /// Real token count per sentence after truncation.
    pub lengths: Vec<usize>,
    pub label: Option<f32>,
}

impl Document {
    /// Fits raw sentences to `max_seq`. Empty sentences become padding rows.
    pub fn new(
        raw: Vec<Vec<u32>>,
        label: Option<f32>,
        max_seq: usize,
        max_sentences: Option<usize>,
    ) -> Result<Self> {
        if raw.is_empty() {
            return Err(TrainingError::data("document has no sentences"));
        }
        if let Some(label) = label {
            if label != 0.0 && label != 1.0 {
                return Err(TrainingError::data(format!(
                    "label must be 0 or 1, got {label}"
                )));
            }
        }
        let keep = max_sentences.unwrap_or(raw.len()).min(raw.len());
        let mut sentences = Vec::with_capacity(keep);
        let mut lengths = Vec::with_capacity(keep);
        for mut sentence in raw.into_iter().take(keep) {
            sentence.truncate(max_seq);
            lengths.push(sentence.len());
            sentence.resize(max_seq, 0);
            sentences.push(sentence);
        }
        Ok(Self {
            sentences,
            lengths,
            label,
        })
    }

    pub fn num_sentences(&self) -> usize {
        self.sentences.len()
    }
}

#[derive(Debug, Clone)]
pub struct DocumentDataset {
    documents: Vec<Document>,
    max_seq: usize,
}

impl DocumentDataset {
    pub fn from_jsonl(
        path: impl AsRef<Path>,
        max_seq: usize,
        max_sentences: Option<usize>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            TrainingError::data(format!("failed to open {}: {err}", path.display()))
        })?;

        let mut documents = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: DocumentRecord = serde_json::from_str(&line).map_err(|err| {
                TrainingError::data(format!(
                    "{}:{}: malformed document: {err}",
                    path.display(),
                    line_no + 1
                ))
            })?;
            let document = Document::new(record.sentences, record.label, max_seq, max_sentences)
                .map_err(|err| {
                    TrainingError::data(format!("{}:{}: {err}", path.display(), line_no + 1))
                })?;
            documents.push(document);
        }

        log::debug!(
            "loaded {} documents from {}",
            documents.len(),
            path.display()
        );
        Self::from_documents(documents, max_seq)
    }

    pub fn from_documents(documents: Vec<Document>, max_seq: usize) -> Result<Self> {
        if max_seq == 0 {
            return Err(TrainingError::data("max_seq must be greater than zero"));
        }
        if documents.is_empty() {
            return Err(TrainingError::data("dataset contains no documents"));
        }
        if let Some(bad) = documents
            .iter()
            .flat_map(|doc| doc.sentences.iter())
            .find(|sentence| sentence.len() != max_seq)
        {
            return Err(TrainingError::data(format!(
                "sentence of length {} does not match max_seq {max_seq}",
                bad.len()
            )));
        }
        Ok(Self { documents, max_seq })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn max_seq(&self) -> usize {
        self.max_seq
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    /// Whether every document carries a label.
    pub fn is_labelled(&self) -> bool {
        self.documents.iter().all(|doc| doc.label.is_some())
    }
}

/// Batch returned by [`DocumentBatcher`].
#[derive(Debug)]
pub struct DocumentBatch {
    /// `(batch, sentences, max_seq)` u32 ids.
    pub documents: Tensor,
    /// `(batch, 1)` f32 labels, present when every document is labelled.
    pub labels: Option<Tensor>,
    /// Dataset positions of the batch rows.
    pub indices: Vec<usize>,
}

impl DocumentBatch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DocumentBatcher {
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    device: Device,
}

impl DocumentBatcher {
    pub fn new(batch_size: usize, shuffle: bool, seed: u64, device: Device) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainingError::data("batch_size must be greater than zero"));
        }
        Ok(Self {
            batch_size,
            shuffle,
            seed,
            device,
        })
    }

    /// Visiting order for `epoch`; shuffled with `seed + epoch` when enabled.
    pub fn order(&self, len: usize, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn batches(&self, dataset: &DocumentDataset, epoch: usize) -> Result<Vec<DocumentBatch>> {
        self.order(dataset.len(), epoch)
            .chunks(self.batch_size)
            .map(|indices| collate(dataset, indices, &self.device))
            .collect()
    }
}

/// Stacks the documents at `indices` into one zero-padded batch.
pub fn collate(dataset: &DocumentDataset, indices: &[usize], device: &Device) -> Result<DocumentBatch> {
    let docs = indices
        .iter()
        .map(|&idx| {
            dataset
                .get(idx)
                .ok_or_else(|| TrainingError::data(format!("document index {idx} out of range")))
        })
        .collect::<Result<Vec<_>>>()?;
    if docs.is_empty() {
        return Err(TrainingError::data("cannot collate an empty batch"));
    }

    let max_seq = dataset.max_seq();
    let sentences = docs.iter().map(|doc| doc.num_sentences()).max().unwrap_or(1);
    let mut ids = vec![0u32; docs.len() * sentences * max_seq];
    for (b, doc) in docs.iter().enumerate() {
        for (s, sentence) in doc.sentences.iter().enumerate() {
            let start = (b * sentences + s) * max_seq;
            ids[start..start + max_seq].copy_from_slice(sentence);
        }
    }
    let documents = Tensor::from_vec(ids, (docs.len(), sentences, max_seq), device)?;

    let labels = docs
        .iter()
        .map(|doc| doc.label)
        .collect::<Option<Vec<f32>>>()
        .map(|labels| {
            let rows = labels.len();
            Tensor::from_vec(labels, (rows, 1), device)
        })
        .transpose()?;

    Ok(DocumentBatch {
        documents,
        labels,
        indices: indices.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_jsonl(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        file
    }

    #[test]
    fn sentences_are_fitted_to_max_seq() {
        let file = write_jsonl(&[
            r#"{"sentences": [[3, 7, 2], [4], []], "label": 1}"#,
            "",
            r#"{"sentences": [[1, 2, 3, 4, 5, 6, 7]], "label": 0}"#,
        ]);
        let dataset = DocumentDataset::from_jsonl(file.path(), 5, None).expect("dataset");
        assert_eq!(dataset.len(), 2);

        let first = &dataset.documents()[0];
        assert_eq!(
            first.sentences,
            vec![vec![3, 7, 2, 0, 0], vec![4, 0, 0, 0, 0], vec![0, 0, 0, 0, 0]]
        );
        assert_eq!(first.lengths, vec![3, 1, 0]);
        assert_eq!(first.label, Some(1.0));

        let second = &dataset.documents()[1];
        assert_eq!(second.sentences, vec![vec![1, 2, 3, 4, 5]]);
        assert_eq!(second.lengths, vec![5]);
    }

    #[test]
    fn max_sentences_caps_documents() {
        let file = write_jsonl(&[r#"{"sentences": [[1], [2], [3]], "label": 0}"#]);
        let dataset = DocumentDataset::from_jsonl(file.path(), 2, Some(2)).expect("dataset");
        assert_eq!(dataset.documents()[0].num_sentences(), 2);
    }

    #[test]
    fn malformed_lines_are_reported_with_position() {
        let empty = write_jsonl(&[r#"{"sentences": [], "label": 0}"#]);
        let err = DocumentDataset::from_jsonl(empty.path(), 4, None).unwrap_err();
        assert!(err.to_string().contains(":1:"), "{err}");

        let bad_label = write_jsonl(&[r#"{"sentences": [[1]], "label": 2}"#]);
        assert!(DocumentDataset::from_jsonl(bad_label.path(), 4, None).is_err());

        let garbage = write_jsonl(&["not json"]);
        assert!(DocumentDataset::from_jsonl(garbage.path(), 4, None).is_err());
    }

    #[test]
    fn unlabelled_documents_are_allowed() {
        let file = write_jsonl(&[r#"{"sentences": [[9, 9]]}"#]);
        let dataset = DocumentDataset::from_jsonl(file.path(), 3, None).expect("dataset");
        assert!(!dataset.is_labelled());

        let batcher = DocumentBatcher::new(4, false, 0, Device::Cpu).expect("batcher");
        let batches = batcher.batches(&dataset, 0).expect("batches");
        assert!(batches[0].labels.is_none());
    }

    #[test]
    fn batches_pad_the_sentence_axis() -> anyhow::Result<()> {
        let docs = vec![
            Document::new(vec![vec![1, 2]], Some(1.0), 3, None)?,
            Document::new(vec![vec![3], vec![4, 5, 6], vec![7]], Some(0.0), 3, None)?,
            Document::new(vec![vec![8]], Some(1.0), 3, None)?,
        ];
        let dataset = DocumentDataset::from_documents(docs, 3)?;
        let batcher = DocumentBatcher::new(2, false, 0, Device::Cpu)?;
        let batches = batcher.batches(&dataset, 0)?;

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].documents.dims(), &[2, 3, 3]);
        assert_eq!(batches[1].documents.dims(), &[1, 1, 3]);
        let first = batches[0].documents.get(0)?.to_vec2::<u32>()?;
        assert_eq!(first, vec![vec![1, 2, 0], vec![0, 0, 0], vec![0, 0, 0]]);
        let labels = batches[0].labels.as_ref().expect("labels").to_vec2::<f32>()?;
        assert_eq!(labels, vec![vec![1.0], vec![0.0]]);
        Ok(())
    }

    #[test]
    fn shuffling_is_deterministic_per_epoch() -> anyhow::Result<()> {
        let batcher = DocumentBatcher::new(4, true, 17, Device::Cpu)?;
        let first = batcher.order(32, 0);
        assert_eq!(first, batcher.order(32, 0));
        assert_ne!(first, batcher.order(32, 1));

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());

        let ordered = DocumentBatcher::new(4, false, 17, Device::Cpu)?;
        assert_eq!(ordered.order(5, 3), vec![0, 1, 2, 3, 4]);
        Ok(())
    }
}
