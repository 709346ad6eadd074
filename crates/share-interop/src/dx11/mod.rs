//! Direct3D 11 backend (Windows, legacy shared handles).

mod blit;
pub mod device;

pub use device::{Dx11Device, Dx11Staging, Dx11Texture};
