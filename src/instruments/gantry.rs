//! Stepper gantry driver.
//!
//! Speaks the controller's bracketed command framing over a [`Transport`]:
//! a move is `<axis,direction,steps>` (e.g. `<x,+,800>`) and the firmware
//! echoes `x+800` once the motion completes, which is what makes moves
//! blocking. A response mentioning a limit switch means the move was
//! refused and the carriage did not travel.

use crate::adapters::Transport;
use crate::core::{Axis, Positioner};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};

const BOOT_BANNER: &str = "Arduino is ready";
/// Banner lines tolerated before giving up on the handshake.
const MAX_BANNER_LINES: usize = 10;

pub struct GantryController {
    transport: Box<dyn Transport>,
    steps_per_mm: f64,
    motors_enabled: bool,
}

impl GantryController {
    pub fn new(transport: Box<dyn Transport>, steps_per_mm: f64) -> Self {
        Self {
            transport,
            steps_per_mm,
            motors_enabled: false,
        }
    }

    /// Wait for the firmware boot banner, then energize the motors.
    pub async fn initialize(&mut self) -> Result<()> {
        for _ in 0..MAX_BANNER_LINES {
            let line = self
                .transport
                .read_line()
                .await
                .context("no response from gantry controller")?;
            debug!("gantry: {line}");
            if line.contains(BOOT_BANNER) {
                info!("gantry controller ready");
                self.set_motors(true).await?;
                return Ok(());
            }
        }
        bail!("gantry controller did not announce readiness")
    }

    /// Home all axes to the firmware's center position.
    ///
    /// The firmware replies only once homing finishes, so this can block
    /// for the full travel time. After homing the carriage sits at the
    /// firmware origin; callers tracking position must reset it to zero.
    pub async fn home(&mut self) -> Result<()> {
        info!("homing gantry");
        let ack = self
            .transport
            .query("<h,+,0>")
            .await
            .context("homing command failed")?;
        debug!("homing complete: {ack}");
        Ok(())
    }

    /// Energize or release the stepper drivers.
    pub async fn set_motors(&mut self, enabled: bool) -> Result<()> {
        let command = if enabled { "<e,+,0>" } else { "<d,+,0>" };
        let ack = self
            .transport
            .query(command)
            .await
            .context("motor enable command failed")?;
        debug!("gantry motors {}: {ack}", if enabled { "on" } else { "off" });
        self.motors_enabled = enabled;
        Ok(())
    }

}

#[async_trait]
impl Positioner for GantryController {
    async fn move_axis(&mut self, axis: Axis, distance_mm: f64) -> Result<bool> {
        let steps = (distance_mm * self.steps_per_mm).round() as i64;
        if steps == 0 {
            return Ok(true);
        }
        let direction = if steps > 0 { '+' } else { '-' };
        let magnitude = steps.unsigned_abs();
        let command = format!("<{},{},{}>", axis.letter(), direction, magnitude);
        let expected = format!("{}{}{}", axis.letter(), direction, magnitude);

        let response = self
            .transport
            .query(&command)
            .await
            .with_context(|| format!("move command {command} failed"))?;

        if response.contains("limit") || response.contains("reached") {
            warn!("gantry refused {axis} move: {response}");
            return Ok(false);
        }
        if response.trim() != expected {
            return Err(anyhow!(
                "gantry echoed '{response}' for {command}, expected '{expected}'"
            ));
        }
        Ok(true)
    }

    /// Release the motors so the stage can be moved by hand between
    /// sessions.
    async fn shutdown(&mut self) -> Result<()> {
        if self.motors_enabled {
            self.set_motors(false).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn gantry_with(transport: MockTransport) -> GantryController {
        GantryController::new(Box::new(transport), 800.0)
    }

    #[tokio::test]
    async fn test_initialize_waits_for_banner_then_enables() {
        let mut transport = MockTransport::new();
        let sent = transport.sent_handle();
        transport.push_response("booting...");
        transport.push_response("Arduino is ready");
        transport.push_response("e+0");
        let mut gantry = gantry_with(transport);
        gantry.initialize().await.unwrap();
        assert_eq!(*sent.lock().unwrap(), vec!["<e,+,0>"]);
    }

    #[tokio::test]
    async fn test_move_converts_mm_to_steps() {
        let mut transport = MockTransport::new();
        let sent = transport.sent_handle();
        transport.push_response("x+400");
        let mut gantry = gantry_with(transport);
        assert!(gantry.move_axis(Axis::X, 0.5).await.unwrap());
        assert_eq!(*sent.lock().unwrap(), vec!["<x,+,400>"]);
    }

    #[tokio::test]
    async fn test_negative_move_uses_minus_direction() {
        let mut transport = MockTransport::new();
        let sent = transport.sent_handle();
        transport.push_response("z-1600");
        let mut gantry = gantry_with(transport);
        assert!(gantry.move_axis(Axis::Z, -2.0).await.unwrap());
        assert_eq!(*sent.lock().unwrap(), vec!["<z,-,1600>"]);
    }

    #[tokio::test]
    async fn test_sub_step_move_is_a_no_op() {
        let mut transport = MockTransport::new();
        let sent = transport.sent_handle();
        let mut gantry = gantry_with(transport);
        // Half a step rounds to zero: no command goes out.
        assert!(gantry.move_axis(Axis::Y, 0.0005).await.unwrap());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_home_sends_command_and_waits_for_ack() {
        let mut transport = MockTransport::new();
        let sent = transport.sent_handle();
        transport.push_response("homed");
        let mut gantry = gantry_with(transport);
        gantry.home().await.unwrap();
        assert_eq!(*sent.lock().unwrap(), vec!["<h,+,0>"]);
    }

    #[tokio::test]
    async fn test_home_propagates_missing_ack() {
        // No queued response: the transport errors instead of acking.
        let transport = MockTransport::new();
        let mut gantry = gantry_with(transport);
        assert!(gantry.home().await.is_err());
    }

    #[tokio::test]
    async fn test_limit_response_is_a_refusal() {
        let mut transport = MockTransport::new();
        transport.push_response("y limit reached");
        let mut gantry = gantry_with(transport);
        assert!(!gantry.move_axis(Axis::Y, 5.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_echo_mismatch_is_an_error() {
        let mut transport = MockTransport::new();
        transport.push_response("garbage");
        let mut gantry = gantry_with(transport);
        assert!(gantry.move_axis(Axis::X, 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_releases_motors_once() {
        let mut transport = MockTransport::new();
        let sent = transport.sent_handle();
        transport.push_response("boot");
        transport.push_response("Arduino is ready");
        transport.push_response("e+0");
        transport.push_response("d+0");
        let mut gantry = gantry_with(transport);
        gantry.initialize().await.unwrap();
        gantry.shutdown().await.unwrap();
        gantry.shutdown().await.unwrap(); // second call must not re-send
        let sent = sent.lock().unwrap();
        assert_eq!(*sent, vec!["<e,+,0>", "<d,+,0>"]);
    }
}
