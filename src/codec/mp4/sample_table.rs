use {super::Mp4Error, mp4::Mp4Track};

/// One media sample as laid out in the file, in track timescale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub offset: u64,
    pub size: u32,
    pub dts: u64,
    pub cts_offset: i64,
    pub keyframe: bool,
}

// Sixteen million samples is days of 60fps video; anything above is a corrupt
// or hostile table.
const MAX_SAMPLES: usize = 1 << 24;

struct ChunkRun {
    first_chunk: u32,
    samples_per_chunk: u32,
}

/// Resolves the parsed `stbl` tables of a track into a flat sample list and
/// the track end time.
pub fn read_samples(track: &Mp4Track) -> Result<(Vec<Sample>, u64), Mp4Error> {
    let stbl = &track.trak.mdia.minf.stbl;

    let count = stbl.stsz.sample_count as usize;
    if count > MAX_SAMPLES {
        return Err(Mp4Error::InconsistentSampleTable("stsz sample count out of range"));
    }
    let sizes = if stbl.stsz.sample_size != 0 {
        vec![stbl.stsz.sample_size; count]
    } else if stbl.stsz.sample_sizes.len() == count {
        stbl.stsz.sample_sizes.clone()
    } else {
        return Err(Mp4Error::InconsistentSampleTable("stsz sizes disagree with its count"));
    };

    let chunk_offsets: Vec<u64> = match (&stbl.stco, &stbl.co64) {
        (Some(stco), _) => stco.entries.iter().map(|&offset| offset as u64).collect(),
        (None, Some(co64)) => co64.entries.clone(),
        (None, None) => return Err(Mp4Error::InconsistentSampleTable("no chunk offsets")),
    };
    let mut runs = Vec::with_capacity(stbl.stsc.entries.len());
    for entry in &stbl.stsc.entries {
        if entry.first_chunk == 0 {
            return Err(Mp4Error::InconsistentSampleTable("stsc chunk numbers are 1-based"));
        }
        runs.push(ChunkRun {
            first_chunk: entry.first_chunk,
            samples_per_chunk: entry.samples_per_chunk,
        });
    }
    let offsets = resolve_offsets(&runs, &chunk_offsets, &sizes)?;

    let stts: Vec<(u32, u32)> = stbl
        .stts
        .entries
        .iter()
        .map(|entry| (entry.sample_count, entry.sample_delta))
        .collect();
    let (decode_times, end) = decode_times(&stts, count)?;

    let cts_offsets = match &stbl.ctts {
        Some(ctts) => {
            let runs: Vec<(u32, i32)> = ctts
                .entries
                .iter()
                .map(|entry| (entry.sample_count, entry.sample_offset))
                .collect();
            composition_offsets(&runs, count)
        }
        None => vec![0; count],
    };

    let keyframes = match &stbl.stss {
        Some(stss) => sync_flags(&stss.entries, count),
        None => vec![true; count],
    };

    let samples = (0..count)
        .map(|i| Sample {
            offset: offsets[i],
            size: sizes[i],
            dts: decode_times[i],
            cts_offset: cts_offsets[i],
            keyframe: keyframes[i],
        })
        .collect();
    Ok((samples, end))
}

fn resolve_offsets(
    runs: &[ChunkRun],
    chunk_offsets: &[u64],
    sizes: &[u32],
) -> Result<Vec<u64>, Mp4Error> {
    let mut offsets = Vec::with_capacity(sizes.len());
    'runs: for (i, run) in runs.iter().enumerate() {
        let last_chunk = runs
            .get(i + 1)
            .map(|next| next.first_chunk.saturating_sub(1))
            .unwrap_or(chunk_offsets.len() as u32);
        for chunk in run.first_chunk..=last_chunk {
            let mut offset = *chunk_offsets
                .get(chunk as usize - 1)
                .ok_or(Mp4Error::InconsistentSampleTable("stsc references a missing chunk"))?;
            for _ in 0..run.samples_per_chunk {
                let Some(size) = sizes.get(offsets.len()) else {
                    break 'runs;
                };
                offsets.push(offset);
                offset += *size as u64;
            }
        }
    }
    if offsets.len() != sizes.len() {
        return Err(Mp4Error::InconsistentSampleTable("stsc covers fewer samples than stsz"));
    }
    Ok(offsets)
}

fn decode_times(runs: &[(u32, u32)], count: usize) -> Result<(Vec<u64>, u64), Mp4Error> {
    let mut times = Vec::with_capacity(count);
    let mut dts = 0u64;
    'runs: for &(run, delta) in runs {
        for _ in 0..run {
            if times.len() == count {
                break 'runs;
            }
            times.push(dts);
            dts += delta as u64;
        }
    }
    if times.len() != count {
        return Err(Mp4Error::InconsistentSampleTable("stts covers fewer samples than stsz"));
    }
    Ok((times, dts))
}

fn composition_offsets(runs: &[(u32, i32)], count: usize) -> Vec<i64> {
    let mut offsets = Vec::with_capacity(count);
    'runs: for &(run, offset) in runs {
        for _ in 0..run {
            if offsets.len() == count {
                break 'runs;
            }
            offsets.push(offset as i64);
        }
    }
    offsets.resize(count, 0);
    offsets
}

fn sync_flags(sync_samples: &[u32], count: usize) -> Vec<bool> {
    let mut sync = vec![false; count];
    for &number in sync_samples {
        if let Some(flag) = (number as usize).checked_sub(1).and_then(|i| sync.get_mut(i)) {
            *flag = true;
        }
    }
    sync
}
