use crate::config::{CascadeConfig, ModelConfig, Stem};
use crate::error::TransUnetError;

#[test]
fn test_indivisible_patch_size_error() {
    let config = ModelConfig::new().with_image_size(512).with_patch_size(15);

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("multiple of patch_size"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_indivisible_head_count_error() {
    let config = ModelConfig::new().with_hidden_size(768).with_n_heads(7);

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("divisible by n_heads"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_invalid_dropout_error() {
    let config = ModelConfig::new().with_dropout(1.0);

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("dropout"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_even_kernel_size_error() {
    let config = ModelConfig::new().with_kernel_size(2);

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("kernel_size must be odd"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_empty_decoder_channels_error() {
    let config = ModelConfig::new().with_decoder(Some(CascadeConfig::new(vec![])));

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("channel list must not be empty"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_invalid_skip_count_error() {
    let config = ModelConfig::new()
        .with_decoder(Some(CascadeConfig::new(vec![256, 128, 64]).with_n_skip(5)));

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("n_skip must be <= 3"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_zero_upsampling_factor_error() {
    let config = ModelConfig::new().with_upsampling_factor(0);

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("upsampling_factor"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_hybrid_image_size_must_fit_backbone() {
    let config = ModelConfig::new()
        .with_image_size(24)
        .with_patch_size(8)
        .with_stem(Stem::Resnet(1));

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("multiple of 16"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_zero_grid_error() {
    let config = ModelConfig::new().with_image_size(512).with_stem(Stem::Resnet(0));

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("evenly tile"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_grid_must_tile_feature_map() {
    // 512/16 = 32 feature map, grid 5 does not tile it.
    let config = ModelConfig::new().with_image_size(512).with_stem(Stem::Resnet(5));

    match config.validate() {
        Err(TransUnetError::InvalidConfiguration { reason }) => {
            assert!(reason.contains("evenly tile"));
        }
        _ => panic!("Expected InvalidConfiguration error"),
    }
}

#[test]
fn test_valid_configuration() {
    let config = ModelConfig::new()
        .with_image_size(512)
        .with_patch_size(16)
        .with_stem(Stem::Resnet(32))
        .with_decoder(Some(CascadeConfig::new(vec![256, 128, 64])));

    assert!(config.validate().is_ok());
}

#[test]
fn test_decoder_absence_is_not_an_error() {
    let config = ModelConfig::new();

    assert!(config.validate().is_ok());
    assert!(config.decoder.is_none());
}

#[test]
fn test_token_grid_calculation() {
    let pure = ModelConfig::new().with_image_size(512).with_patch_size(16);
    assert_eq!(pure.token_grid(), 32);
    assert_eq!(pure.n_patches(), 1024);

    let hybrid = ModelConfig::new()
        .with_image_size(512)
        .with_stem(Stem::Resnet(16));
    assert_eq!(hybrid.token_grid(), 16);
    assert_eq!(hybrid.embedding_patch_size(), 2); // (512/16)/16
    assert_eq!(hybrid.embedding_in_channels(), 1024);
}

#[test]
fn test_cascade_skip_channels() {
    let cascade = CascadeConfig::new(vec![256, 128, 64, 16]).with_n_skip(3);

    let hybrid = ModelConfig::new()
        .with_image_size(64)
        .with_stem(Stem::Resnet(4));
    assert_eq!(
        hybrid.cascade_skip_channels(&cascade),
        vec![512, 256, 64, 0]
    );

    // Without the backbone there is nothing to fuse at any stage.
    let pure = ModelConfig::new();
    assert_eq!(pure.cascade_skip_channels(&cascade), vec![0, 0, 0, 0]);
}
