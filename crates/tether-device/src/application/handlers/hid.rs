//! Motion sensor handlers.

use tether_core::{MethodInterface, StatusCode};

use super::finish_with;
use crate::application::session::Session;
use crate::infrastructure::native::HidService;

fn forward(mi: &mut MethodInterface<'_>, session: &Session, op: fn(&dyn HidService) -> StatusCode) {
    if !mi.finish_input_parameters() {
        return;
    }
    let status = op(session.services().hid.as_ref());
    mi.finish_good(status);
}

/// `HIDUSER_EnableAccelerometer`
pub fn enable_accelerometer(mi: &mut MethodInterface<'_>, session: &Session) {
    forward(mi, session, |hid| hid.enable_accelerometer());
}

/// `HIDUSER_DisableAccelerometer`
pub fn disable_accelerometer(mi: &mut MethodInterface<'_>, session: &Session) {
    forward(mi, session, |hid| hid.disable_accelerometer());
}

/// `HIDUSER_EnableGyroscope`
pub fn enable_gyroscope(mi: &mut MethodInterface<'_>, session: &Session) {
    forward(mi, session, |hid| hid.enable_gyroscope());
}

/// `HIDUSER_DisableGyroscope`
pub fn disable_gyroscope(mi: &mut MethodInterface<'_>, session: &Session) {
    forward(mi, session, |hid| hid.disable_gyroscope());
}

/// `HIDUSER_GetGyroRawToDpsCoef`: slot 0 is the coefficient (f32).
pub fn get_gyro_raw_to_dps_coef(mi: &mut MethodInterface<'_>, session: &Session) {
    if !mi.finish_input_parameters() {
        return;
    }
    let result = session.services().hid.gyro_raw_to_dps();
    finish_with(mi, result.map(f32::to_le_bytes));
}

/// `HIDUSER_GetGyroCalibrateParam`: slot 0 is the 18-byte calibration block.
pub fn get_gyro_calibrate_param(mi: &mut MethodInterface<'_>, session: &Session) {
    if !mi.finish_input_parameters() {
        return;
    }
    let result = session.services().hid.gyro_calibration();
    finish_with(mi, result.map(|cal| cal.encode()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::testing::{call, success};
    use crate::infrastructure::native::memory::MemoryBackend;
    use crate::infrastructure::native::GyroCalibration;
    use crate::infrastructure::streaming::StreamingSettings;
    use tether_core::protocol::codec::RequestBuilder;

    #[test]
    fn test_enable_then_disable_gyroscope() {
        // Arrange
        let backend = MemoryBackend::demo();
        let session = Session::new(backend.services(), StreamingSettings::default());

        // Act
        let (enabled, _) = success(call(
            &session,
            RequestBuilder::new(1, "HIDUSER_EnableGyroscope"),
            enable_gyroscope,
        ));
        let was_on = backend.hid.gyroscope_enabled();
        success(call(
            &session,
            RequestBuilder::new(2, "HIDUSER_DisableGyroscope"),
            disable_gyroscope,
        ));

        // Assert
        assert_eq!(enabled, 0);
        assert!(was_on);
        assert!(!backend.hid.gyroscope_enabled());
    }

    #[test]
    fn test_accelerometer_toggle() {
        let backend = MemoryBackend::demo();
        let session = Session::new(backend.services(), StreamingSettings::default());

        success(call(
            &session,
            RequestBuilder::new(1, "HIDUSER_EnableAccelerometer"),
            enable_accelerometer,
        ));
        assert!(backend.hid.accelerometer_enabled());
        success(call(
            &session,
            RequestBuilder::new(2, "HIDUSER_DisableAccelerometer"),
            disable_accelerometer,
        ));
        assert!(!backend.hid.accelerometer_enabled());
    }

    #[test]
    fn test_coefficient_is_f32() {
        let session = Session::new(MemoryBackend::demo().services(), StreamingSettings::default());

        let (_, buffers) = success(call(
            &session,
            RequestBuilder::new(1, "HIDUSER_GetGyroRawToDpsCoef"),
            get_gyro_raw_to_dps_coef,
        ));

        assert_eq!(buffers, vec![14.375f32.to_le_bytes().to_vec()]);
    }

    #[test]
    fn test_calibration_is_18_bytes() {
        let session = Session::new(MemoryBackend::demo().services(), StreamingSettings::default());

        let (_, buffers) = success(call(
            &session,
            RequestBuilder::new(1, "HIDUSER_GetGyroCalibrateParam"),
            get_gyro_calibrate_param,
        ));

        assert_eq!(buffers[0].len(), GyroCalibration::ENCODED_SIZE);
    }
}
