//! Secondary backends.
//!
//! The 6502, i8080, Game Boy and 68000 targets are pure toolkit tables
//! driven by [`crate::BaseGenerator`]; the C, LLVM and WebAssembly targets
//! emit their own syntax. None of them use self-modifying code.

mod c;
mod gameboy;
mod i8080;
mod llvm;
mod m68k;
mod mos6502;
mod wasm;

pub use c::CBackend;
pub use gameboy::GameBoyBackend;
pub use i8080::I8080Backend;
pub use llvm::LlvmBackend;
pub use m68k::M68kBackend;
pub use mos6502::Mos6502Backend;
pub use wasm::WasmBackend;

/// Declare a backend that is nothing but a toolkit run through the base
/// generator.
macro_rules! toolkit_backend {
    ($(#[$doc:meta])* $name:ident, $backend_name:literal, $toolkit:expr) => {
        $(#[$doc])*
        pub struct $name {
            toolkit: $crate::Toolkit,
        }

        impl $name {
            /// Fresh backend instance.
            pub fn new() -> Self {
                Self { toolkit: $toolkit }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $crate::Backend for $name {
            fn name(&self) -> &'static str {
                $backend_name
            }

            fn toolkit(&self) -> &$crate::Toolkit {
                &self.toolkit
            }

            fn generate(
                &mut self,
                module: &minz_mir::Module,
                opts: &$crate::CodegenOptions,
            ) -> Result<$crate::GenOutput, $crate::CodegenError> {
                $crate::BaseGenerator::new(&self.toolkit).generate(module, opts)
            }
        }
    };
}

pub(crate) use toolkit_backend;
