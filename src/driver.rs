//! Forward execution of a generated convolution kernel.
//!
//! `ConvForward` owns the kernel and its scratchpad booking. `execute`
//! splits `mb × groups × oc-chunks × oh × ow-blocks` evenly across worker
//! threads, walks each thread's range in the planned loop order and calls
//! the kernel once per (output row, ow block, oc block group).

use log::{debug, info};
use rayon::prelude::*;

use crate::attr::PrimitiveAttr;
use crate::compiler::call_args::ConvCallArgs;
use crate::compiler::conf::{ConvConf, LoopOrder};
use crate::compiler::executable::ConvKernel;
use crate::compiler::planner::plan;
use crate::compiler::scratchpad::{init_scratchpad, Registrar, ScratchpadKey};
use crate::dispatch::device_profile;
use crate::error::{ConvError, ConvResult};
use crate::reference::reference_forward;
use crate::types::ConvDesc;

#[inline]
fn div_up(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Split `n` items over `team` workers; worker `tid` gets `[start, end)`.
/// The first `n % team` workers get one extra item.
pub fn balance211(n: usize, team: usize, tid: usize) -> (usize, usize) {
    if team <= 1 || n == 0 {
        return (0, n);
    }
    let n1 = div_up(n, team);
    let n2 = n1 - 1;
    let t1 = n - n2 * team;
    let start = if tid <= t1 { tid * n1 } else { t1 * n1 + (tid - t1) * n2 };
    let len = if tid < t1 { n1 } else { n2 };
    (start, start + len)
}

/// Pack plain `goihw` weights (`[g][oc][ic][kh][kw]`, elements of
/// `conf.wei_dt`) into the blocked layout the kernel reads, zero-padding
/// partial channel blocks.
pub fn reorder_weights(conf: &ConvConf, plain: &[u8]) -> ConvResult<Vec<u8>> {
    let tw = conf.typesize_wei;
    let (ic, oc, kh, kw) = (conf.ic_without_padding, conf.oc_without_padding, conf.kh, conf.kw);
    let need = conf.ngroups * oc * ic * kh * kw * tw;
    if plain.len() < need {
        return Err(ConvError::InvalidArguments(format!(
            "plain weights hold {} bytes, needs {need}",
            plain.len()
        )));
    }
    let mut blocked = vec![0u8; conf.weights_len() * tw];
    let mut copy = |dst_idx: usize, src_idx: usize| {
        blocked[dst_idx * tw..(dst_idx + 1) * tw].copy_from_slice(&plain[src_idx * tw..(src_idx + 1) * tw]);
    };

    if conf.is_depthwise {
        let cb = conf.ch_block;
        for g in 0..conf.ngroups {
            for h in 0..kh {
                for w in 0..kw {
                    let src_idx = (g * kh + h) * kw + w;
                    copy((((g / cb) * kh + h) * kw + w) * cb + g % cb, src_idx);
                }
            }
        }
        return Ok(blocked);
    }

    let (ib, ob) = (conf.ic_block, conf.oc_block);
    for g in 0..conf.ngroups {
        for o in 0..oc {
            for i in 0..ic {
                for h in 0..kh {
                    for w in 0..kw {
                        let src_idx = (((g * oc + o) * ic + i) * kh + h) * kw + w;
                        let block = (g * conf.nb_oc + o / ob) * conf.nb_ic + i / ib;
                        let dst_idx = (((block * kh + h) * kw + w) * ib + i % ib) * ob + o % ob;
                        copy(dst_idx, src_idx);
                    }
                }
            }
        }
    }
    Ok(blocked)
}

/// Work-space dimensions the loop orders permute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dim {
    Mb,
    Group,
    OcChunk,
    Oh,
    OwBlock,
}

/// Outermost first.
fn loop_dims(order: LoopOrder) -> [Dim; 5] {
    use Dim::*;
    match order {
        LoopOrder::Cwgn => [OcChunk, OwBlock, Group, Mb, Oh],
        LoopOrder::Ngcw => [Mb, Group, OcChunk, OwBlock, Oh],
        LoopOrder::Nwcg => [Mb, Oh, OwBlock, OcChunk, Group],
        LoopOrder::Nhwcg => [Mb, Oh, OwBlock, OcChunk, Group],
    }
}

/// One work item: an output row segment of one image and channel group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WorkItem {
    n: usize,
    g: usize,
    occ: usize,
    oh: usize,
    owb: usize,
}

impl WorkItem {
    fn get_mut(&mut self, d: Dim) -> &mut usize {
        match d {
            Dim::Mb => &mut self.n,
            Dim::Group => &mut self.g,
            Dim::OcChunk => &mut self.occ,
            Dim::Oh => &mut self.oh,
            Dim::OwBlock => &mut self.owb,
        }
    }
}

/// Odometer over the work space in one loop order.
struct WorkIter {
    dims: [Dim; 5],
    extents: [usize; 5],
    cur: WorkItem,
}

impl WorkIter {
    fn new(order: LoopOrder, extent: impl Fn(Dim) -> usize, start: usize) -> Self {
        let dims = loop_dims(order);
        let extents = dims.map(&extent);
        let mut cur = WorkItem::default();
        let mut rest = start;
        for i in (0..5).rev() {
            *cur.get_mut(dims[i]) = rest % extents[i];
            rest /= extents[i];
        }
        WorkIter { dims, extents, cur }
    }

    fn step(&mut self) {
        for i in (0..5).rev() {
            let v = self.cur.get_mut(self.dims[i]);
            *v += 1;
            if *v < self.extents[i] {
                return;
            }
            *v = 0;
        }
    }
}

/// Buffer addresses, passed to the workers as plain integers.
#[derive(Debug, Clone, Copy)]
struct Buffers {
    src: usize,
    weights: usize,
    bias: usize,
    scales: usize,
    dst: usize,
}

/// Element offsets of one kernel call into each buffer.
#[derive(Debug, Clone, Copy)]
struct Offsets {
    src: usize,
    dst: usize,
    weights: usize,
    bias: usize,
    scale: usize,
}

/// A planned and generated convolution ready to run.
pub struct ConvForward {
    kernel: ConvKernel,
    scratchpad: Registrar,
    scales: Vec<f32>,
    nthreads: usize,
}

impl ConvForward {
    /// Plan and generate for the current host. All or nothing.
    pub fn new(desc: &ConvDesc, attr: &PrimitiveAttr, nthreads: usize) -> ConvResult<Self> {
        let nthreads = nthreads.max(1);
        let conf = plan(desc, attr, nthreads)?;
        Self::with_conf(conf, attr, nthreads)
    }

    /// Generate for an already planned configuration, e.g. one planned with
    /// `plan_for_isa`. `attr` must be the attributes it was planned with.
    pub fn with_conf(conf: ConvConf, attr: &PrimitiveAttr, nthreads: usize) -> ConvResult<Self> {
        let expected = if conf.is_oc_scale { conf.ngroups * conf.oc_without_padding } else { 1 };
        if attr.output_scales.scales.len() != expected {
            return Err(ConvError::InvalidArguments(format!(
                "expected {expected} output scales, got {}",
                attr.output_scales.scales.len()
            )));
        }
        let mut scratchpad = Registrar::new();
        init_scratchpad(&mut scratchpad, &conf);
        let kernel = ConvKernel::create(conf)?;
        Ok(ConvForward { kernel, scratchpad, scales: attr.output_scales.scales.clone(), nthreads: nthreads.max(1) })
    }

    pub fn conf(&self) -> &ConvConf {
        self.kernel.conf()
    }

    pub fn kernel(&self) -> &ConvKernel {
        &self.kernel
    }

    /// Bytes of scratchpad `execute_with_scratchpad` needs.
    pub fn scratchpad_size(&self) -> usize {
        self.scratchpad.size()
    }

    /// Bytes of the blocked weight tensor.
    pub fn weights_size(&self) -> usize {
        self.conf().weights_len() * self.conf().typesize_wei
    }

    pub fn src_size(&self) -> usize {
        self.conf().src_len() * self.conf().typesize_in
    }

    pub fn dst_size(&self) -> usize {
        self.conf().dst_len() * self.conf().typesize_out
    }

    /// Run with an internally allocated scratchpad.
    ///
    /// `weights` must be in the blocked layout (see `reorder_weights`).
    pub fn execute(&self, src: &[u8], weights: &[u8], bias: Option<&[u8]>, dst: &mut [u8]) -> ConvResult<()> {
        let mut scratch = vec![0u8; self.scratchpad_size()];
        self.execute_with_scratchpad(src, weights, bias, dst, &mut scratch)
    }

    pub fn execute_with_scratchpad(
        &self,
        src: &[u8],
        weights: &[u8],
        bias: Option<&[u8]>,
        dst: &mut [u8],
        scratchpad: &mut [u8],
    ) -> ConvResult<()> {
        let c = self.conf();
        if !device_profile().supports(c.isa) {
            return Err(ConvError::Unimplemented(format!("host cannot run {:?} kernels", c.isa)));
        }
        let check = |what: &str, got: usize, need: usize| {
            if got < need {
                Err(ConvError::InvalidArguments(format!("{what} buffer holds {got} bytes, needs {need}")))
            } else {
                Ok(())
            }
        };
        check("src", src.len(), self.src_size())?;
        check("weights", weights.len(), self.weights_size())?;
        check("dst", dst.len(), self.dst_size())?;
        check("scratchpad", scratchpad.len(), self.scratchpad_size())?;
        let bias_addr = match (c.with_bias, bias) {
            (true, Some(b)) => {
                check("bias", b.len(), c.ngroups * c.oc_without_padding * c.typesize_bia)?;
                b.as_ptr() as usize
            }
            (false, None) => 0,
            (true, None) => return Err(ConvError::InvalidArguments("bias buffer missing".into())),
            (false, Some(_)) => {
                return Err(ConvError::InvalidArguments("bias given for a bias-less convolution".into()))
            }
        };

        let mut grantor = self.scratchpad.grantor(scratchpad);
        let Some(adjusted) = grantor.get_as::<f32>(ScratchpadKey::ConvAdjustedScales) else {
            panic!("adjusted scales not booked");
        };
        self.fill_adjusted_scales(adjusted);

        let bufs = Buffers {
            src: src.as_ptr() as usize,
            weights: weights.as_ptr() as usize,
            bias: bias_addr,
            scales: adjusted.as_ptr() as usize,
            dst: dst.as_mut_ptr() as usize,
        };

        let (groups, oc_chunks) = self.work_groups();
        let work = c.mb * groups * oc_chunks * c.oh * c.nb_ow;
        let nthr = self.nthreads.min(work).max(1);
        debug!("conv execute: {work} work items over {nthr} threads, order {:?}", c.loop_order);

        let run = |ithr: usize| {
            let (start, end) = balance211(work, nthr, ithr);
            if start < end {
                // SAFETY: buffer sizes were validated above; threads write
                // disjoint output row segments.
                unsafe { self.run_range(&bufs, start, end, groups, oc_chunks) };
            }
        };
        if nthr == 1 {
            run(0);
        } else {
            (0..nthr).into_par_iter().for_each(run);
        }
        Ok(())
    }

    /// `(group iterations, oc chunks)`: depthwise walks channel-block
    /// groups with a single oc chunk, regular walks groups × oc chunks.
    fn work_groups(&self) -> (usize, usize) {
        let c = self.conf();
        if c.is_depthwise {
            (c.nb_ch / c.nb_ch_blocking, 1)
        } else {
            (c.ngroups, div_up(c.nb_oc, c.nb_oc_blocking_thr_chunk))
        }
    }

    /// Per-channel scales are copied and zero-padded to whole blocks; a
    /// common scale fills every lane.
    fn fill_adjusted_scales(&self, out: &mut [f32]) {
        let c = self.conf();
        if !c.is_oc_scale {
            out.fill(self.scales[0]);
            return;
        }
        out.fill(0.0);
        if c.is_depthwise {
            out[..c.ngroups].copy_from_slice(&self.scales[..c.ngroups]);
        } else {
            let oc_wp = c.oc_without_padding;
            for g in 0..c.ngroups {
                out[g * c.oc..g * c.oc + oc_wp].copy_from_slice(&self.scales[g * oc_wp..(g + 1) * oc_wp]);
            }
        }
    }

    unsafe fn run_range(&self, bufs: &Buffers, start: usize, end: usize, groups: usize, oc_chunks: usize) {
        let c = self.conf();
        let extent = |d: Dim| match d {
            Dim::Mb => c.mb,
            Dim::Group => groups,
            Dim::OcChunk => oc_chunks,
            Dim::Oh => c.oh,
            Dim::OwBlock => c.nb_ow,
        };
        let mut it = WorkIter::new(c.loop_order, extent, start);
        for _ in start..end {
            self.run_item(bufs, it.cur);
            it.step();
        }
    }

    unsafe fn run_item(&self, bufs: &Buffers, item: WorkItem) {
        let c = self.conf();
        let dh = c.dilate_h + 1;
        let ij = (item.oh * c.stride_h) as isize - c.t_pad as isize;
        let t_overflow = c.kh.min(div_up((-ij).max(0) as usize, dh));
        let bottom = ij + ((c.kh - 1) * dh + 1) as isize - c.ih as isize;
        let b_overflow = c.kh.min(div_up(bottom.max(0) as usize, dh));
        let kh_padding = c.kh.saturating_sub(t_overflow + b_overflow);
        // first input row the kernel reads; padded rows are never touched
        let row = (ij + (t_overflow * dh) as isize).max(0) as usize;

        let ow_s = item.owb * c.ow_block;
        let src_pixel = (item.n * c.ih + row) * c.iw + ow_s * c.stride_w;
        let dst_pixel = (item.n * c.oh + item.oh) * c.ow + ow_s;
        let row_skip = if c.signed_input { 0 } else { t_overflow * c.weights_row_len() };

        let mut args = ConvCallArgs {
            kh_padding,
            t_overflow,
            b_overflow,
            owb: item.owb,
            ..ConvCallArgs::default()
        };

        if c.is_depthwise {
            let gb = item.g * c.nb_ch_blocking;
            let ch = gb * c.ch_block;
            args.oc_blocks = gb;
            let offsets = Offsets {
                src: src_pixel * c.src_pixel_stride() + ch,
                dst: dst_pixel * c.dst_pixel_stride() + ch,
                weights: gb * c.kh * c.kw * c.ch_block + row_skip,
                bias: ch,
                scale: ch,
            };
            self.fill_pointers(&mut args, bufs, &offsets);
            self.kernel.call(&args);
            return;
        }

        let g = item.g;
        let ocb_start = item.occ * c.nb_oc_blocking_thr_chunk;
        let ocb_end = (ocb_start + c.nb_oc_blocking_thr_chunk).min(c.nb_oc);
        for ocb in (ocb_start..ocb_end).step_by(c.nb_oc_blocking) {
            let ch = g * c.oc_without_padding + ocb * c.oc_block;
            args.oc_blocks = ocb;
            let offsets = Offsets {
                src: src_pixel * c.src_pixel_stride() + g * c.ic_without_padding,
                dst: dst_pixel * c.dst_pixel_stride() + ch,
                weights: (g * c.nb_oc + ocb) * c.nb_ic * c.kh * c.kw * c.ic_block * c.oc_block + row_skip,
                bias: ch,
                // the scale table is laid out over padded channels
                scale: g * c.oc + ocb * c.oc_block,
            };
            self.fill_pointers(&mut args, bufs, &offsets);
            self.kernel.call(&args);
        }
    }

    fn fill_pointers(&self, args: &mut ConvCallArgs, bufs: &Buffers, o: &Offsets) {
        let c = self.conf();
        args.src = (bufs.src + o.src * c.typesize_in) as *const u8;
        args.dst = (bufs.dst + o.dst * c.typesize_out) as *mut u8;
        args.filt = (bufs.weights + o.weights * c.typesize_wei) as *const u8;
        args.bias = if c.with_bias { (bufs.bias + o.bias * c.typesize_bia) as *const u8 } else { std::ptr::null() };
        let scale = if c.is_oc_scale { o.scale } else { 0 };
        args.scales = (bufs.scales + scale * std::mem::size_of::<f32>()) as *const f32;
    }
}

impl std::fmt::Debug for ConvForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvForward")
            .field("kernel", &self.kernel)
            .field("scratchpad_size", &self.scratchpad.size())
            .field("nthreads", &self.nthreads)
            .finish()
    }
}

/// Run the convolution with a generated kernel when one exists for this
/// host, otherwise with the scalar reference.
///
/// Takes plain `goihw` weights and reorders them as needed.
pub fn forward_or_fallback(
    desc: &ConvDesc,
    attr: &PrimitiveAttr,
    src: &[u8],
    weights: &[u8],
    bias: Option<&[u8]>,
    dst: &mut [u8],
    nthreads: usize,
) -> ConvResult<()> {
    match ConvForward::new(desc, attr, nthreads) {
        Ok(fwd) => {
            let blocked = reorder_weights(fwd.conf(), weights)?;
            fwd.execute(src, &blocked, bias, dst)
        }
        Err(e) if e.is_unimplemented() => {
            info!("no generated kernel ({e}), using the scalar reference");
            reference_forward(desc, attr, src, weights, bias, dst)
        }
        Err(e) => Err(e),
    }
}
