use bytes::{BufMut, BytesMut};

/// Sample rate of every clip handed to a transcriber
pub const TARGET_SAMPLE_RATE: u32 = 16000;

const WAV_HEADER_LEN: usize = 44;

/// Resample audio to 16kHz by nearest-sample decimation
pub fn resample_to_16khz(samples: &[f32], original_sample_rate: u32) -> Vec<f32> {
    if original_sample_rate == TARGET_SAMPLE_RATE || original_sample_rate == 0 {
        return samples.to_vec();
    }

    let ratio = original_sample_rate as f32 / TARGET_SAMPLE_RATE as f32;
    let output_len = (samples.len() as f32 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_index = (i as f32 * ratio) as usize;
        output.push(samples.get(src_index).copied().unwrap_or(0.0));
    }

    output
}

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Root mean square of a block of samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Encode mono f32 samples as a 16-bit PCM RIFF/WAVE file
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_len = (samples.len() * block_align as usize) as u32;

    let mut buf = BytesMut::with_capacity(WAV_HEADER_LEN + data_len as usize);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len);
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1); // PCM
    buf.put_u16_le(CHANNELS);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(BITS_PER_SAMPLE);

    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        buf.put_i16_le((clamped * i16::MAX as f32) as i16);
    }

    buf.to_vec()
}
