//! Reader for OpenCV's stock Haar cascade files (`opencv-cascade-classifier`
//! XML, as shipped in `data/haarcascades`).
//!
//! Only boosted stumps over upright Haar features are supported, which covers
//! the frontal face cascades. Tilted features and deeper trees are rejected.

use anyhow::{Context, Result};
use roxmltree::{Document, Node};

use crate::cascade::{HaarCascade, Stage, WeakClassifier, WeightedRect};

fn child<'a, 'i>(node: Node<'a, 'i>, tag: &str) -> Result<Node<'a, 'i>> {
    node.children()
        .find(|c| c.has_tag_name(tag))
        .with_context(|| format!("missing <{tag}> in <{}>", node.tag_name().name()))
}

/// OpenCV stores sequences as `<_>` elements.
fn items<'a, 'i>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(|c| c.has_tag_name("_"))
}

fn numbers(node: Node<'_, '_>) -> Result<Vec<f64>> {
    node.text()
        .unwrap_or_default()
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .with_context(|| format!("bad number {t:?} in <{}>", node.tag_name().name()))
        })
        .collect()
}

fn scalar(node: Node<'_, '_>, tag: &str) -> Result<f64> {
    match numbers(child(node, tag)?)?.as_slice() {
        [v] => Ok(*v),
        other => anyhow::bail!("<{tag}> holds {} values, expected one", other.len()),
    }
}

fn pixel(v: f64, what: &str) -> Result<u32> {
    if v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
        anyhow::bail!("{what} {v} is not a pixel offset");
    }
    Ok(v as u32)
}

fn feature(node: Node<'_, '_>) -> Result<Vec<WeightedRect>> {
    if let Some(tilted) = node.children().find(|c| c.has_tag_name("tilted")) {
        if numbers(tilted)?.first().is_some_and(|&t| t != 0.0) {
            anyhow::bail!("tilted features are not supported");
        }
    }
    items(child(node, "rects")?)
        .map(|r| match numbers(r)?.as_slice() {
            &[x, y, w, h, weight] => Ok(WeightedRect {
                x: pixel(x, "x")?,
                y: pixel(y, "y")?,
                width: pixel(w, "width")?,
                height: pixel(h, "height")?,
                weight: weight as f32,
            }),
            other => anyhow::bail!("rect with {} values, expected 5", other.len()),
        })
        .collect()
}

fn weak_classifier(node: Node<'_, '_>, features: &[Vec<WeightedRect>]) -> Result<WeakClassifier> {
    let internal = numbers(child(node, "internalNodes")?)?;
    let leaves = numbers(child(node, "leafValues")?)?;
    // one split: left child, right child, feature index, threshold
    let (&[_, _, idx, threshold], &[left, right]) = (internal.as_slice(), leaves.as_slice()) else {
        anyhow::bail!(
            "weak classifier with {} node values and {} leaves; only stumps are supported",
            internal.len(),
            leaves.len()
        );
    };
    let rects = features
        .get(pixel(idx, "feature index")? as usize)
        .with_context(|| format!("feature index {idx} out of range"))?
        .clone();
    Ok(WeakClassifier {
        rects,
        threshold: threshold as f32,
        left: left as f32,
        right: right as f32,
    })
}

pub(crate) fn parse(text: &str) -> Result<HaarCascade> {
    let doc = Document::parse(text)?;
    let Some(cascade) = doc.descendants().find(|n| n.has_tag_name("cascade")) else {
        if doc
            .descendants()
            .any(|n| n.attribute("type_id") == Some("opencv-haar-classifier"))
        {
            anyhow::bail!("old-style opencv-haar-classifier files are not supported");
        }
        anyhow::bail!("no <cascade> element");
    };

    if let Some(kind) = cascade.children().find(|c| c.has_tag_name("featureType")) {
        let kind = kind.text().unwrap_or_default().trim();
        if kind != "HAAR" {
            anyhow::bail!("{kind} features are not supported");
        }
    }

    let width = pixel(scalar(cascade, "width")?, "width")?;
    let height = pixel(scalar(cascade, "height")?, "height")?;

    let features = items(child(cascade, "features")?)
        .enumerate()
        .map(|(i, f)| feature(f).with_context(|| format!("feature {i}")))
        .collect::<Result<Vec<_>>>()?;

    let stages = items(child(cascade, "stages")?)
        .enumerate()
        .map(|(i, stage)| {
            let classifiers = items(child(stage, "weakClassifiers")?)
                .map(|w| weak_classifier(w, &features))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("stage {i}"))?;
            Ok(Stage {
                threshold: scalar(stage, "stageThreshold")? as f32,
                classifiers,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(HaarCascade {
        name: String::new(),
        window: [width, height],
        stages,
    })
}
