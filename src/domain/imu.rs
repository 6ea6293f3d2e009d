//! IMU sampling
//!
//! Sensor readings and their CSV record format. Raw sampling is provided by an
//! [`ImuSensor`] implementation.

/// One accelerometer + gyroscope sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuReading {
    // Accelerometer (g)
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,

    // Gyroscope (deg/s)
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
}

impl ImuReading {
    /// `elapsedSeconds,accelX,accelY,accelZ,gyroX,gyroY,gyroZ`
    pub fn to_record(&self, elapsed_secs: f64) -> String {
        format!(
            "{:.4},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
            elapsed_secs,
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z
        )
    }
}

pub trait ImuSensor {
    fn read(&mut self) -> ImuReading;
}

/// Deterministic waveform source for the simulator
#[derive(Debug, Default)]
pub struct SimulatedImu {
    step: u64,
}

impl ImuSensor for SimulatedImu {
    fn read(&mut self) -> ImuReading {
        let t = self.step as f32 * 0.05;
        self.step += 1;
        ImuReading {
            accel_x: 0.2 * t.sin(),
            accel_y: 0.2 * t.cos(),
            accel_z: 1.0,
            gyro_x: 30.0 * (0.5 * t).sin(),
            gyro_y: 15.0 * (0.5 * t).cos(),
            gyro_z: 5.0 * t.sin(),
        }
    }
}

/// Always returns the same reading
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedImu(pub ImuReading);

impl ImuSensor for FixedImu {
    fn read(&mut self) -> ImuReading {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_has_seven_fixed_precision_fields() {
        let reading = ImuReading {
            accel_x: 0.5,
            accel_y: -1.25,
            accel_z: 0.98,
            gyro_x: 10.0,
            gyro_y: -3.5,
            gyro_z: 0.0,
        };
        let record = reading.to_record(1.23456);
        assert_eq!(record, "1.2346,0.500,-1.250,0.980,10.000,-3.500,0.000");
        assert_eq!(record.split(',').count(), 7);
    }

    #[test]
    fn test_simulated_imu_advances() {
        let mut imu = SimulatedImu::default();
        let first = imu.read();
        let second = imu.read();
        assert_ne!(first, second);
        assert_eq!(first.accel_z, 1.0);
    }
}
