//! PCM-Hilfen der Software-Engine
//!
//! G.711 µ-law (ITU-T G.711, segmentiert mit Bias 0x84), L16 big-endian,
//! Kanal-Downmix und lineares Resampling.

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Kodiert ein 16-Bit-Sample nach µ-law
pub fn ulaw_encode(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let vorzeichen = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut maske = 0x4000;
    while exponent > 0 && pcm & maske == 0 {
        exponent -= 1;
        maske >>= 1;
    }
    let mantisse = (pcm >> (exponent + 3)) & 0x0F;
    !((vorzeichen | (exponent << 4) | mantisse) as u8)
}

/// Dekodiert ein µ-law-Byte in ein 16-Bit-Sample
pub fn ulaw_decode(byte: u8) -> i16 {
    let u = !byte;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantisse = (u & 0x0F) as i32;
    let betrag = (((mantisse << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if u & 0x80 != 0 {
        -betrag as i16
    } else {
        betrag as i16
    }
}

/// L16-Nutzdaten (big-endian) in Samples
pub fn l16_decode(nutzdaten: &[u8]) -> Vec<i16> {
    nutzdaten
        .chunks_exact(2)
        .map(|b| i16::from_be_bytes([b[0], b[1]]))
        .collect()
}

/// Samples in L16-Nutzdaten (big-endian)
pub fn l16_encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

/// Mittelt interleaved Mehrkanal-Samples zu Mono
pub fn downmix(samples: &[i16], channels: u8) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let summe: i32 = frame.iter().map(|&s| s as i32).sum();
            (summe / frame.len() as i32) as i16
        })
        .collect()
}

/// Verteilt Mono-Samples auf `channels` interleaved Kanaele
pub fn upmix(mono: &[i16], channels: u8) -> Vec<i16> {
    if channels <= 1 {
        return mono.to_vec();
    }
    mono.iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels as usize))
        .collect()
}

/// Lineares Resampling auf genau `ziel_laenge` Samples
pub fn resample_linear(eingabe: &[i16], ziel_laenge: usize) -> Vec<i16> {
    if ziel_laenge == 0 {
        return Vec::new();
    }
    if eingabe.is_empty() {
        return vec![0; ziel_laenge];
    }
    if eingabe.len() == ziel_laenge {
        return eingabe.to_vec();
    }

    let letzter = eingabe.len() - 1;
    let schritt = eingabe.len() as f64 / ziel_laenge as f64;
    (0..ziel_laenge)
        .map(|i| {
            let pos = i as f64 * schritt;
            let idx = (pos as usize).min(letzter);
            let frac = pos - idx as f64;
            let a = eingabe[idx] as f64;
            let b = eingabe[(idx + 1).min(letzter)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Addiert `quelle` saettigend auf `ziel`
pub fn mix_into(ziel: &mut [i16], quelle: &[i16]) {
    for (z, &q) in ziel.iter_mut().zip(quelle) {
        *z = z.saturating_add(q);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_stille_und_extremwerte() {
        assert_eq!(ulaw_encode(0), 0xFF);
        assert_eq!(ulaw_decode(0xFF), 0);
        assert_eq!(ulaw_encode(i16::MAX), 0x80);
        assert_eq!(ulaw_decode(0x80), 32124);
        assert_eq!(ulaw_decode(0x00), -32124);
    }

    #[test]
    fn ulaw_quantisierungsfehler_begrenzt() {
        for &s in &[100i16, -100, 1000, -1000, 8000, -8000, 30000] {
            let zurueck = ulaw_decode(ulaw_encode(s));
            let fehler = (zurueck as i32 - s as i32).abs();
            // Segmentbreite waechst mit dem Betrag: Fehler < 1/16 des Werts + Bias
            assert!(fehler <= (s as i32).abs() / 16 + 8, "s={} zurueck={}", s, zurueck);
        }
    }

    #[test]
    fn l16_ist_big_endian() {
        assert_eq!(l16_encode(&[0x0102, -1]), vec![0x01, 0x02, 0xFF, 0xFF]);
        assert_eq!(l16_decode(&[0x01, 0x02, 0xFF, 0xFF, 0x07]), vec![0x0102, -1]);
    }

    #[test]
    fn downmix_und_upmix() {
        assert_eq!(downmix(&[100, 300, -50, 50], 2), vec![200, 0]);
        assert_eq!(upmix(&[1, 2], 2), vec![1, 1, 2, 2]);
        assert_eq!(upmix(&[1, 2], 1), vec![1, 2]);
    }

    #[test]
    fn resample_verdoppelt_laenge() {
        let aus = resample_linear(&[0, 100, 200, 300], 8);
        assert_eq!(aus.len(), 8);
        assert_eq!(aus[0], 0);
        assert_eq!(aus[1], 50);
        assert_eq!(aus[2], 100);
    }

    #[test]
    fn resample_leer_ergibt_stille() {
        assert_eq!(resample_linear(&[], 3), vec![0, 0, 0]);
    }

    #[test]
    fn mix_saettigt() {
        let mut ziel = vec![30000i16, -30000, 5];
        mix_into(&mut ziel, &[10000, -10000, 5]);
        assert_eq!(ziel, vec![i16::MAX, i16::MIN, 10]);
    }
}
