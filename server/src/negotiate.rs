//! `Accept` header negotiation over the supported audio types.

use tts_core::format::{AudioFormat, MP4_MIME_TYPES, WAVE_MIME_TYPES};

struct MediaRange<'a> {
    kind: &'a str,
    subtype: &'a str,
    q: f32,
}

fn parse_ranges(accept: &str) -> Vec<MediaRange<'_>> {
    accept
        .split(',')
        .filter_map(|part| {
            let mut params = part.split(';');
            let essence = params.next()?.trim();
            let (kind, subtype) = essence.split_once('/')?;
            let q = params
                .filter_map(|p| p.trim().split_once('='))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("q"))
                .and_then(|(_, v)| v.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            Some(MediaRange {
                kind: kind.trim(),
                subtype: subtype.trim(),
                q,
            })
        })
        .collect()
}

// Specificity of `range` against `mime`: exact 2, `type/*` 1, `*/*` 0.
fn specificity(range: &MediaRange<'_>, mime: &str) -> Option<u8> {
    let (kind, subtype) = mime.split_once('/')?;
    if range.kind == "*" && range.subtype == "*" {
        Some(0)
    } else if !range.kind.eq_ignore_ascii_case(kind) {
        None
    } else if range.subtype == "*" {
        Some(1)
    } else if range.subtype.eq_ignore_ascii_case(subtype) {
        Some(2)
    } else {
        None
    }
}

/// Choose the response type for an `Accept` value.
///
/// Each supported type takes the quality of the most specific range that
/// matches it. The highest quality wins; ties go to the range the client
/// listed first, then to the order of the supported set. Containers with no
/// encoder are never chosen. Without an acceptable match the baseline
/// `audio/wave` is used.
pub fn negotiate(accept: Option<&str>) -> (AudioFormat, &'static str) {
    let baseline = (AudioFormat::Wave, AudioFormat::Wave.baseline_mime());
    let Some(accept) = accept.filter(|a| !a.trim().is_empty()) else {
        return baseline;
    };
    let ranges = parse_ranges(accept);

    let supported = WAVE_MIME_TYPES
        .iter()
        .map(|m| (AudioFormat::Wave, *m))
        .chain(MP4_MIME_TYPES.iter().map(|m| (AudioFormat::Mp4Aac, *m)))
        .filter(|(format, _)| format.is_encodable());

    let mut best: Option<(f32, usize, (AudioFormat, &'static str))> = None;
    for candidate in supported {
        let matched = ranges
            .iter()
            .enumerate()
            .filter_map(|(i, r)| specificity(r, candidate.1).map(|s| (s, i, r.q)))
            .max_by_key(|(s, _, _)| *s);
        let Some((_, index, q)) = matched else {
            continue;
        };
        if q <= 0.0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_q, best_index, _)) => q > best_q || (q == best_q && index < best_index),
        };
        if better {
            best = Some((q, index, candidate));
        }
    }

    best.map(|(_, _, chosen)| chosen).unwrap_or(baseline)
}
