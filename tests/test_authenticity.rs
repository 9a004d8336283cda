use orbital_change::core::authenticity::{RejectionReason, LAPLACIAN_VARIANCE_FLOOR};
use orbital_change::{AuthenticityValidator, Image};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[test]
fn test_uniform_gray_is_rejected() {
    let gray = Image::from_elem((3, 128, 128), 0.5);
    let report = AuthenticityValidator::new().assess(&gray);
    println!("📊 gray: {:?}", report);
    assert_eq!(report.rejection, Some(RejectionReason::TooSmooth));
}

#[test]
fn test_neon_checkerboard_is_rejected() {
    // Magenta / green squares
    let neon = Image::from_shape_fn((3, 128, 128), |(c, i, j)| {
        let on = (i / 8 + j / 8) % 2 == 0;
        match (c, on) {
            (0, true) | (2, true) | (1, false) => 1.0,
            _ => 0.0,
        }
    });
    let validator = AuthenticityValidator::new();
    let report = validator.assess(&neon);
    println!("📊 neon: {:?}", report);
    assert!(!validator.validate(&neon));
    assert_eq!(report.rejection, Some(RejectionReason::OverSaturated));
}

#[test]
fn test_random_texture_is_accepted() {
    let mut rng = StdRng::seed_from_u64(2024);
    let texture = Image::from_shape_fn((3, 128, 128), |_| rng.gen_range(0.25..0.55));
    let validator = AuthenticityValidator::new();
    let report = validator.assess(&texture);
    println!("📊 texture: {:?}", report);
    assert!(report.is_authentic());
    assert!(report.laplacian_variance > LAPLACIAN_VARIANCE_FLOOR);
    assert!(validator.validate(&texture));
}
