//! Opinionated PDU field codec
//!
//! Assumes little endian for all types, as every multi-octet field on air is.

pub trait FixedSize: Sized {
    const SIZE: usize;
}

pub trait Type: Sized {
    fn size(&self) -> usize;
}

pub trait Encode: Type {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error>;
}

pub trait Decode<'d>: Type {
    fn decode(src: &'d [u8]) -> Result<Self, Error>;
}

impl<T: FixedSize> Type for T {
    fn size(&self) -> usize {
        Self::SIZE
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InsufficientSpace,
    InvalidValue,
}

macro_rules! impl_le {
    ($($ty:ty),*) => {
        $(
            impl FixedSize for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();
            }

            impl Encode for $ty {
                fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
                    let dest = dest.get_mut(..Self::SIZE).ok_or(Error::InsufficientSpace)?;
                    dest.copy_from_slice(&self.to_le_bytes());
                    Ok(())
                }
            }

            impl<'d> Decode<'d> for $ty {
                fn decode(src: &'d [u8]) -> Result<Self, Error> {
                    let src = src.get(..Self::SIZE).ok_or(Error::InsufficientSpace)?;
                    let mut bytes = [0; core::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(src);
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

impl_le!(u8, u16, u32);
