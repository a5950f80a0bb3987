use crate::errors::{OverkillError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanPoint {
    /// Temperature in °C
    pub temperature: i16,
    /// Fan speed in percent (0-100)
    pub fan_speed: u8,
}

impl FanPoint {
    pub const fn new(temperature: i16, fan_speed: u8) -> Self {
        Self {
            temperature,
            fan_speed,
        }
    }
}

/// Piecewise-linear temperature to fan speed mapping.
///
/// Always holds at least one point, strictly increasing in temperature. The
/// points are fixed at construction; a different curve means a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FanPoint>", into = "Vec<FanPoint>")]
pub struct FanCurve {
    points: Vec<FanPoint>,
}

impl FanCurve {
    pub fn new(points: Vec<FanPoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(OverkillError::InvalidFanCurve(
                "a fan curve needs at least one point".to_string(),
            ));
        }
        if let Some(p) = points.iter().find(|p| p.fan_speed > 100) {
            return Err(OverkillError::InvalidFanCurve(format!(
                "fan speed {}% at {}°C exceeds 100%",
                p.fan_speed, p.temperature
            )));
        }
        if let Some(pair) = points
            .windows(2)
            .find(|w| w[0].temperature >= w[1].temperature)
        {
            return Err(OverkillError::InvalidFanCurve(format!(
                "temperatures must strictly increase ({}°C then {}°C)",
                pair[0].temperature, pair[1].temperature
            )));
        }
        Ok(Self { points })
    }

    /// Build one of the compiled-in curves
    fn builtin(points: &[(i16, u8)]) -> Self {
        Self {
            points: points.iter().map(|&(t, s)| FanPoint::new(t, s)).collect(),
        }
    }

    pub fn points(&self) -> &[FanPoint] {
        &self.points
    }

    /// Fan speed for a given temperature using linear interpolation
    pub fn speed_for(&self, temperature: f32) -> u8 {
        let first = self.points[0];
        if temperature <= f32::from(first.temperature) {
            return first.fan_speed;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            let (t1, t2) = (f32::from(lo.temperature), f32::from(hi.temperature));

            if t1 < temperature && temperature <= t2 {
                let factor = (temperature - t1) / (t2 - t1);
                let (s1, s2) = (f32::from(lo.fan_speed), f32::from(hi.fan_speed));
                let speed = s1 + factor * (s2 - s1);
                return speed.round().clamp(0.0, 100.0) as u8;
            }
        }

        // Above the hottest point (or NaN).
        self.points[self.points.len() - 1].fan_speed
    }

    /// General purpose curve used when nothing else is chosen
    pub fn standard() -> Self {
        Self::builtin(&[(40, 0), (50, 30), (60, 50), (70, 80), (80, 100)])
    }

    pub fn safe() -> Self {
        Self::builtin(&[(45, 0), (55, 20), (65, 40), (75, 70), (80, 100)])
    }

    pub fn balanced() -> Self {
        Self::builtin(&[(40, 0), (50, 25), (60, 45), (70, 75), (80, 100)])
    }

    pub fn performance() -> Self {
        Self::builtin(&[(35, 10), (45, 30), (55, 50), (65, 80), (75, 100)])
    }

    pub fn extreme() -> Self {
        Self::builtin(&[(30, 20), (40, 40), (50, 60), (60, 85), (70, 100)])
    }

    /// Curve tuned for an overclock profile; unknown names get `balanced`
    pub fn for_profile(profile_name: &str) -> Self {
        match profile_name {
            "safe" => Self::safe(),
            "performance" => Self::performance(),
            "extreme" => Self::extreme(),
            _ => Self::balanced(),
        }
    }
}

impl TryFrom<Vec<FanPoint>> for FanCurve {
    type Error = OverkillError;

    fn try_from(points: Vec<FanPoint>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<FanCurve> for Vec<FanPoint> {
    fn from(curve: FanCurve) -> Self {
        curve.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_curve_interpolation() {
        let curve = FanCurve::standard();

        // Exact knots
        assert_eq!(curve.speed_for(40.0), 0);
        assert_eq!(curve.speed_for(60.0), 50);
        assert_eq!(curve.speed_for(80.0), 100);

        // Between knots
        assert_eq!(curve.speed_for(45.0), 15);
        assert_eq!(curve.speed_for(65.0), 65);
        assert_eq!(curve.speed_for(52.5), 35);

        // Clamped ends
        assert_eq!(curve.speed_for(35.0), 0);
        assert_eq!(curve.speed_for(90.0), 100);
    }

    #[test]
    fn test_interpolation_rounds_to_nearest() {
        let curve = FanCurve::new(vec![FanPoint::new(0, 0), FanPoint::new(3, 10)]).unwrap();
        assert_eq!(curve.speed_for(1.0), 3); // 3.33
        assert_eq!(curve.speed_for(2.0), 7); // 6.67
    }

    #[test]
    fn test_single_point_curve() {
        let curve = FanCurve::new(vec![FanPoint::new(50, 60)]).unwrap();
        assert_eq!(curve.speed_for(20.0), 60);
        assert_eq!(curve.speed_for(90.0), 60);
    }

    #[test]
    fn test_invalid_curves_rejected() {
        assert!(FanCurve::new(vec![]).is_err());
        assert!(FanCurve::new(vec![FanPoint::new(50, 101)]).is_err());
        assert!(FanCurve::new(vec![FanPoint::new(50, 10), FanPoint::new(50, 20)]).is_err());
        assert!(FanCurve::new(vec![FanPoint::new(60, 10), FanPoint::new(50, 20)]).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: FanCurve = serde_json::from_str(
            r#"[{"temperature":40,"fan_speed":0},{"temperature":60,"fan_speed":80}]"#,
        )
        .unwrap();
        assert_eq!(ok.points().len(), 2);

        let bad = serde_json::from_str::<FanCurve>(
            r#"[{"temperature":60,"fan_speed":0},{"temperature":40,"fan_speed":80}]"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_builtin_curves_are_valid() {
        for curve in [
            FanCurve::standard(),
            FanCurve::safe(),
            FanCurve::balanced(),
            FanCurve::performance(),
            FanCurve::extreme(),
        ] {
            FanCurve::new(curve.points().to_vec()).unwrap();
        }
    }

    #[test]
    fn test_profile_mapping() {
        assert_eq!(FanCurve::for_profile("safe"), FanCurve::safe());
        assert_eq!(FanCurve::for_profile("extreme"), FanCurve::extreme());
        assert_eq!(FanCurve::for_profile("unknown"), FanCurve::balanced());

        // More aggressive profiles spin the fan harder at the same temperature.
        let at_60: Vec<u8> = ["safe", "balanced", "performance", "extreme"]
            .iter()
            .map(|name| FanCurve::for_profile(name).speed_for(60.0))
            .collect();
        assert!(at_60.windows(2).all(|w| w[0] <= w[1]), "{:?}", at_60);
    }
}
