//! Siglent oscilloscope driver.
//!
//! Implements [`Digitizer`] over the SCPI-ish Siglent dialect on channel 1.
//! `CHDR OFF` is sent first so query responses come back as bare values.
//! Waveform reads use the binary `C1:WF? DAT1` block: a `#9` marker, nine
//! ASCII digits of payload length, then signed 8-bit sample codes. Codes
//! convert to volts as `code / 25 * vdiv + offset`, with 25 codes per
//! division on this family.

use crate::adapters::Transport;
use crate::core::Digitizer;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info};

/// Sample codes per vertical division.
const CODES_PER_DIVISION: f64 = 25.0;

pub struct SiglentScope {
    transport: Box<dyn Transport>,
    volts_per_div: f64,
    offset_v: f64,
}

impl SiglentScope {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            volts_per_div: 1.0,
            offset_v: 0.0,
        }
    }

    /// Identify the instrument and cache the vertical settings the waveform
    /// conversion depends on.
    pub async fn initialize(&mut self) -> Result<()> {
        self.transport
            .send("CHDR OFF")
            .await
            .context("failed to disable response headers")?;
        let idn = self
            .transport
            .query("*IDN?")
            .await
            .context("scope identification failed")?;
        info!("digitizer: {idn}");
        self.volts_per_div = parse_value(&self.transport.query("C1:VDIV?").await?)
            .context("bad VDIV response")?;
        self.offset_v = parse_value(&self.transport.query("C1:OFST?").await?)
            .context("bad OFST response")?;
        debug!(
            "scope at {} V/div, offset {} V",
            self.volts_per_div, self.offset_v
        );
        Ok(())
    }

    fn convert(&self, codes: &[u8]) -> Vec<f64> {
        codes
            .iter()
            .map(|&b| b as i8 as f64 / CODES_PER_DIVISION * self.volts_per_div + self.offset_v)
            .collect()
    }
}

/// Parse a numeric response, tolerating a trailing unit suffix (`2.00E-01V`).
fn parse_value(response: &str) -> Result<f64> {
    let trimmed = response.trim().trim_end_matches(|c: char| c.is_alphabetic());
    trimmed
        .parse()
        .map_err(|_| anyhow!("unparseable numeric response '{response}'"))
}

/// Extract the sample codes from a `#9`-framed binary block.
fn parse_waveform_block(raw: &[u8]) -> Result<&[u8]> {
    let marker = raw
        .windows(2)
        .position(|w| w == b"#9")
        .ok_or_else(|| anyhow!("waveform block missing #9 marker"))?;
    let digits = raw
        .get(marker + 2..marker + 11)
        .ok_or_else(|| anyhow!("waveform block truncated in length field"))?;
    let length: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("bad waveform length field"))?;
    let start = marker + 11;
    raw.get(start..start + length)
        .ok_or_else(|| anyhow!("waveform block shorter than declared length {length}"))
}

#[async_trait]
impl Digitizer for SiglentScope {
    async fn set_range(&mut self, volts_per_div: f64) -> Result<()> {
        // Reprogramming an unchanged range would still cost a settling
        // delay on the instrument; skip it.
        if (volts_per_div - self.volts_per_div).abs() / self.volts_per_div < 1e-6 {
            return Ok(());
        }
        self.transport
            .send(&format!("C1:VDIV {volts_per_div}V"))
            .await
            .with_context(|| format!("failed to set range {volts_per_div} V/div"))?;
        self.volts_per_div = volts_per_div;
        Ok(())
    }

    async fn read_waveform(&mut self) -> Result<Vec<f64>> {
        let raw = self
            .transport
            .query_raw("C1:WF? DAT1")
            .await
            .context("waveform read failed")?;
        let codes = parse_waveform_block(&raw)?;
        if codes.is_empty() {
            bail!("waveform block contained no samples");
        }
        Ok(self.convert(codes))
    }

    async fn query(&mut self, setting: &str) -> Result<String> {
        let command = match setting {
            "vdiv" => "C1:VDIV?",
            "tdiv" => "TDIV?",
            "coupling" => "C1:CPL?",
            "trigger_mode" => "TRMD?",
            "offset" => "C1:OFST?",
            other => other,
        };
        self.transport.query(command).await
    }
}
