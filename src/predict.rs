use candle_core::Tensor;
use model::HierarchicalAttentionNetwork;
use serde::Serialize;
use training::{data::DocumentBatch, Document, DocumentBatcher, DocumentDataset, TrainingError};

/// One output line of `han predict`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentPrediction {
    /// Position in the input file.
    pub index: usize,
    pub probability: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<f32>,
    /// One row per sentence, trimmed to the sentence's real length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_attention: Option<Vec<Vec<f32>>>,
    /// Trimmed to the document's sentence count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_attention: Option<Vec<f32>>,
}

/// Inference over every document of `dataset`, in file order.
pub fn predict_dataset(
    network: &HierarchicalAttentionNetwork,
    dataset: &DocumentDataset,
    batch_size: usize,
    with_attention: bool,
) -> Result<Vec<DocumentPrediction>, TrainingError> {
    let device = network.config().device.clone();
    let batcher = DocumentBatcher::new(batch_size, false, 0, device)?;
    let mut predictions = Vec::with_capacity(dataset.len());
    for batch in batcher.batches(dataset, 0)? {
        predictions.extend(predict_batch(network, dataset, &batch, with_attention)?);
    }
    Ok(predictions)
}

fn predict_batch(
    network: &HierarchicalAttentionNetwork,
    dataset: &DocumentDataset,
    batch: &DocumentBatch,
    with_attention: bool,
) -> Result<Vec<DocumentPrediction>, TrainingError> {
    let (probabilities, attention) = if with_attention {
        let out = network.diagnostics().forward(&batch.documents)?;
        let words = out.word_attention.squeeze(3)?.to_vec3::<f32>()?;
        let sentences = out.sentence_attention.squeeze(2)?.to_vec2::<f32>()?;
        (out.probabilities, Some((words, sentences)))
    } else {
        (network.classifier().predict(&batch.documents)?, None)
    };
    let probabilities = column(&probabilities)?;

    batch
        .indices
        .iter()
        .enumerate()
        .map(|(row, &index)| {
            let document = dataset
                .get(index)
                .ok_or_else(|| TrainingError::data(format!("document index {index} out of range")))?;
            let (word_attention, sentence_attention) = match &attention {
                Some((words, sentences)) => {
                    let (w, s) = trim_attention(document, &words[row], &sentences[row]);
                    (Some(w), Some(s))
                }
                None => (None, None),
            };
            Ok(DocumentPrediction {
                index,
                probability: probabilities[row],
                label: document.label,
                word_attention,
                sentence_attention,
            })
        })
        .collect()
}

fn column(probabilities: &Tensor) -> Result<Vec<f32>, TrainingError> {
    Ok(probabilities.squeeze(1)?.to_vec1::<f32>()?)
}

/// Drops batch padding sentences and per-sentence padding positions.
fn trim_attention(
    document: &Document,
    words: &[Vec<f32>],
    sentences: &[f32],
) -> (Vec<Vec<f32>>, Vec<f32>) {
    let count = document.num_sentences();
    let words = words
        .iter()
        .zip(&document.lengths)
        .map(|(row, &len)| row[..len].to_vec())
        .collect();
    (words, sentences[..count].to_vec())
}
