#![allow(dead_code)]

use std::io::Cursor;

/// 16-bit PCM WAV holding a 220 Hz tone with a little amplitude modulation.
pub fn tone_wav(sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (sample_rate as f32 * seconds) as u32;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let envelope = 0.6 + 0.4 * (t * 3.0 * std::f32::consts::TAU).sin();
            let sample = ((t * 220.0 * std::f32::consts::TAU).sin() * envelope * 9000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
