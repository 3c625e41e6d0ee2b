//! Installed convolution kernels.
//!
//! A kernel computes one output row segment per call: `ConvCallArgs` names
//! the source row, the weights and output of the first channel block, and
//! where the segment sits in the row (`owb`, overflow counts). Everything
//! else (shape, blocking, post-ops) is baked into the code from `ConvConf`.

use crate::compiler::call_args::ConvCallArgs;
use crate::compiler::codegen;
use crate::compiler::conf::ConvConf;
use crate::error::{ConvError, ConvResult};

/// Signature of a generated convolution kernel.
pub type ConvKernelFn = unsafe extern "sysv64" fn(*const ConvCallArgs);

/// Machine code for one `ConvConf`, mapped read+execute.
///
/// Calls from several threads are fine as long as their `ConvCallArgs`
/// address disjoint output segments.
pub struct ConvKernel {
    code: ExecutableBuffer,
    code_size: usize,
    conf: ConvConf,
}

impl ConvKernel {
    /// Generate and install the kernel for `conf`. No mapping outlives an
    /// error.
    pub fn create(conf: ConvConf) -> ConvResult<Self> {
        let bytes = codegen::generate(&conf)?;
        Self::from_code(&bytes, conf)
    }

    /// Install already generated machine code.
    pub(crate) fn from_code(bytes: &[u8], conf: ConvConf) -> ConvResult<Self> {
        if bytes.is_empty() {
            return Err(ConvError::Codegen("empty kernel".into()));
        }
        let code = ExecutableBuffer::new(bytes)?;
        Ok(ConvKernel { code, code_size: bytes.len(), conf })
    }

    /// The raw entry point. Only valid while `self` is alive.
    #[inline]
    pub fn entry_point(&self) -> ConvKernelFn {
        // SAFETY: `code` holds a complete function emitted for the sysv64
        // ABI and stays mapped for as long as `self` lives.
        unsafe { std::mem::transmute::<*mut u8, ConvKernelFn>(self.code.ptr) }
    }

    /// Size of the generated code in bytes (before page rounding).
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn conf(&self) -> &ConvConf {
        &self.conf
    }

    /// Compute the row segment `args` selects.
    ///
    /// # Safety
    /// `src`, `filt`, `bias`, `scales` and `dst` in `args` must point into
    /// tensors laid out as `conf()` describes and stay valid for the whole
    /// call. The kernel reads `kh_padding` source rows and `ow_block`
    /// pixels from there, plus one scale vector per channel block. No other
    /// thread may write the output segment meanwhile, and the host must
    /// support `conf().isa`.
    #[inline]
    pub unsafe fn call(&self, args: &ConvCallArgs) {
        let f = self.entry_point();
        f(args as *const ConvCallArgs);
    }
}

impl std::fmt::Debug for ConvKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvKernel")
            .field("code_size", &self.code_size)
            .field("isa", &self.conf.isa)
            .field("vec_width", &self.conf.vec_width)
            .finish()
    }
}

/// Anonymous page-rounded mapping holding the kernel code.
struct ExecutableBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is owned by this value alone and is read+execute only
// once `new` returns, so sharing the pointer cannot race.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Map, copy `code` in, then drop write permission.
    fn new(code: &[u8]) -> ConvResult<Self> {
        let page_size = page_size();
        let len = (code.len() + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file descriptor; the result
        // is checked against MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(ConvError::Executable(format!(
                "mmap of {len} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let ptr = ptr as *mut u8;

        // SAFETY: the mapping is `len >= code.len()` bytes and writable.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }

        let ret = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr as *mut _, len);
            }
            return Err(ConvError::Executable(format!("mprotect failed: {err}")));
        }

        Ok(ExecutableBuffer { ptr, len })
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut _, self.len);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
