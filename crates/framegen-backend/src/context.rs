//! Frame-generation context: one session over a fixed image set.
//!
//! A context owns everything tied to one swapchain configuration: the
//! imported source/destination images, the chain graph, its descriptor
//! pool, constant buffers, samplers, command buffers and the two
//! timeline semaphores. `schedule_frames` runs one pre-pass over the
//! current source pair and then one main pass per destination image.
//!
//! Timeline contract: before each call the host signals `sync` to the
//! context's next expected value; the pre-pass waits on it and signals
//! the internal `prepass` timeline, every main pass waits on `prepass`
//! and signals `sync` once, so the host observes generated frame `k` of
//! a call when `sync` reaches `idx + k`.

use ash::vk;
use std::os::fd::RawFd;

use framegen_common::{
    color_subresource_range, Buffer, CommandBuffer, DescriptorPool, Fence, Image, Sampler,
    TimelineSemaphore, VulkanContext,
};

use crate::chains::{
    Alpha0, Alpha1, Beta0, Beta1, ChainCtx, Delta0, Delta1, FrameConstants, Gamma0, Gamma1,
    Generate, Mipmaps,
};
use crate::error::Error;
use crate::limits::pool_limits;
use crate::registry::ShaderRegistry;

/// How long the previous main-pass batch may stay in flight before a
/// call fails with `Error::Timeout`.
const FRAME_FENCE_TIMEOUT_NS: u64 = 150_000_000;

/// Parameters of one frame-generation session.
pub struct ContextParams<'fd> {
    /// Opaque FDs of the two source images the host alternates between.
    pub source_fds: (RawFd, RawFd),
    /// Opaque FDs of the destination images, one per generated frame.
    pub dest_fds: &'fd [RawFd],
    /// Opaque FD of the host's timeline semaphore, initially 0.
    pub sync_fd: RawFd,
    pub width: u32,
    pub height: u32,
    pub hdr: bool,
    /// Flow scale in [0.25, 1.0]; analysis runs at `extent / flow`.
    pub flow: f32,
    /// Performance mode: half-width analysis chains.
    pub perf: bool,
}

/// One generation pass: everything needed for one destination image.
struct Pass {
    gamma0: Vec<Gamma0>,
    gamma1: Vec<Gamma1>,
    delta0: Vec<Delta0>,
    delta1: Vec<Delta1>,
    generate: Generate,
}

/// A live frame-generation session.
pub struct FrameContext<'a> {
    // Chains drop before the descriptor pool inside `ctx`.
    mipmaps: Mipmaps,
    alpha0: Vec<Alpha0>,
    alpha1: Vec<Alpha1>,
    beta0: Beta0,
    beta1: Beta1,
    passes: Vec<Pass>,

    ctx: ChainCtx<'a>,

    // Owned solely to keep the imported/shared GPU memory alive; the
    // chains hold their handles inside descriptor sets.
    #[allow(dead_code)]
    source_images: (Image, Image),
    #[allow(dead_code)]
    dest_images: Vec<Image>,
    black_image: Image,

    sync_semaphore: TimelineSemaphore,
    prepass_semaphore: TimelineSemaphore,
    cmdbufs: Vec<CommandBuffer>,
    fence: Fence,

    /// Next timeline value to signal.
    idx: u64,
    /// Real source pairs consumed so far.
    fidx: usize,
}

impl<'a> FrameContext<'a> {
    pub fn new(
        vk: &'a VulkanContext,
        shaders: &'a ShaderRegistry,
        params: &ContextParams,
    ) -> Result<Self, Error> {
        let count = params.dest_fds.len();
        let extent = vk::Extent2D {
            width: params.width,
            height: params.height,
        };
        let format = if params.hdr {
            vk::Format::R16G16B16A16_SFLOAT
        } else {
            vk::Format::R8G8B8A8_UNORM
        };
        let usage = vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED;

        let source_images = (
            Image::import(vk, extent, format, usage, params.source_fds.0)
                .map_err(|e| Error::device("unable to import source images").because(e))?,
            Image::import(vk, extent, format, usage, params.source_fds.1)
                .map_err(|e| Error::device("unable to import source images").because(e))?,
        );

        let mut dest_images = Vec::with_capacity(count);
        for &fd in params.dest_fds {
            dest_images.push(
                Image::import(vk, extent, format, usage, fd)
                    .map_err(|e| Error::device("unable to import destination images").because(e))?,
            );
        }

        let black_image = Image::new(
            vk,
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::Format::R8G8B8A8_UNORM,
        )
        .map_err(|e| Error::device("unable to create black image").because(e))?;

        let sync_semaphore = TimelineSemaphore::import(vk, 0, params.sync_fd)
            .map_err(|e| Error::device("unable to import timeline semaphore").because(e))?;
        let prepass_semaphore = TimelineSemaphore::new(vk, 0)
            .map_err(|e| Error::device("unable to create prepass semaphore").because(e))?;

        let mut cmdbufs = Vec::with_capacity(count + 1);
        for _ in 0..(count + 1) {
            cmdbufs.push(
                CommandBuffer::new(vk)
                    .map_err(|e| Error::device("unable to create command buffers").because(e))?,
            );
        }

        let fence = Fence::new(vk)
            .map_err(|e| Error::device("unable to create frame fence").because(e))?;

        let ctx = Self::build_chain_ctx(vk, shaders, extent, params, count)?;

        // Pre-pass chains: pyramid, per-level alpha, temporal beta.
        let mipmaps = Mipmaps::new(&ctx, &source_images)?;

        let mut alpha0 = Vec::with_capacity(7);
        for i in 0..7 {
            alpha0.push(Alpha0::new(&ctx, &mipmaps.images()[i])?);
        }

        let temporal_counts = [3, 2, 2, 2, 2, 2, 2];
        let mut alpha1 = Vec::with_capacity(7);
        for i in 0..7 {
            alpha1.push(Alpha1::new(&ctx, temporal_counts[i], alpha0[i].images())?);
        }

        let beta0 = Beta0::new(&ctx, alpha1[0].images())?;
        let beta1 = Beta1::new(&ctx, beta0.images())?;

        // Main passes: seven gamma stages coarse-to-fine, delta joining
        // from stage 4, and the final generate.
        let mut passes = Vec::with_capacity(count);
        for k in 0..count {
            let mut gamma0: Vec<Gamma0> = Vec::with_capacity(7);
            let mut gamma1: Vec<Gamma1> = Vec::with_capacity(7);
            let mut delta0: Vec<Delta0> = Vec::with_capacity(3);
            let mut delta1: Vec<Delta1> = Vec::with_capacity(3);

            for j in 0..7 {
                if j == 0 {
                    // The coarsest stage has no prior estimate.
                    gamma0.push(Gamma0::new(
                        &ctx,
                        k,
                        alpha1[6 - j].images(),
                        &black_image,
                    )?);
                    let stage = Gamma1::new(
                        &ctx,
                        k,
                        gamma0[j].images(),
                        &black_image,
                        &beta1.images()[5],
                    )?;
                    gamma1.push(stage);
                } else {
                    gamma0.push(Gamma0::new(
                        &ctx,
                        k,
                        alpha1[6 - j].images(),
                        gamma1[j - 1].image(),
                    )?);
                    let stage = Gamma1::new(
                        &ctx,
                        k,
                        gamma0[j].images(),
                        gamma1[j - 1].image(),
                        &beta1.images()[6 - j],
                    )?;
                    gamma1.push(stage);
                }

                if j == 4 {
                    // First delta stage bootstraps from the black image.
                    delta0.push(Delta0::new(
                        &ctx,
                        k,
                        alpha1[6 - j].images(),
                        &black_image,
                        gamma1[j - 1].image(),
                    )?);
                    let stage = Delta1::new(
                        &ctx,
                        k,
                        delta0[j - 4].images0(),
                        delta0[j - 4].images1(),
                        &black_image,
                        &beta1.images()[6 - j],
                        &black_image,
                    )?;
                    delta1.push(stage);
                } else if j > 4 {
                    delta0.push(Delta0::new(
                        &ctx,
                        k,
                        alpha1[6 - j].images(),
                        delta1[j - 5].image0(),
                        gamma1[j - 1].image(),
                    )?);
                    let stage = Delta1::new(
                        &ctx,
                        k,
                        delta0[j - 4].images0(),
                        delta0[j - 4].images1(),
                        delta1[j - 5].image0(),
                        &beta1.images()[6 - j],
                        delta1[j - 5].image1(),
                    )?;
                    delta1.push(stage);
                }
            }

            let generate = Generate::new(
                &ctx,
                k,
                &source_images,
                gamma1[6].image(),
                delta1[2].image0(),
                delta1[2].image1(),
                &dest_images[k],
            )?;

            passes.push(Pass {
                gamma0,
                gamma1,
                delta0,
                delta1,
                generate,
            });
        }

        let context = Self {
            mipmaps,
            alpha0,
            alpha1,
            beta0,
            beta1,
            passes,
            ctx,
            source_images,
            dest_images,
            black_image,
            sync_semaphore,
            prepass_semaphore,
            cmdbufs,
            fence,
            idx: 1,
            fidx: 0,
        };

        context.initialize_images(vk)?;
        Ok(context)
    }

    fn build_chain_ctx(
        vk: &'a VulkanContext,
        shaders: &'a ShaderRegistry,
        extent: vk::Extent2D,
        params: &ContextParams,
        count: usize,
    ) -> Result<ChainCtx<'a>, Error> {
        let inv_flow = 1.0 / params.flow;

        let pool = DescriptorPool::new(vk, pool_limits(count, params.perf))
            .map_err(|e| Error::device("unable to create descriptor pool").because(e))?;

        let shared_constants = Buffer::uniform(
            vk,
            &FrameConstants::new(0, 1, params.hdr, inv_flow),
        )
        .map_err(|e| Error::device("unable to create constant buffers").because(e))?;

        let mut frame_constants = Vec::with_capacity(count);
        for k in 0..count {
            frame_constants.push(
                Buffer::uniform(vk, &FrameConstants::new(k, count, params.hdr, inv_flow))
                    .map_err(|e| Error::device("unable to create constant buffers").because(e))?,
            );
        }

        let sampler = |mode, compare, white| {
            Sampler::new(vk, mode, compare, white)
                .map_err(|e| Error::device("unable to create samplers").because(e))
        };
        let border_black = sampler(
            vk::SamplerAddressMode::CLAMP_TO_BORDER,
            vk::CompareOp::NEVER,
            false,
        )?;
        let border_white = sampler(
            vk::SamplerAddressMode::CLAMP_TO_BORDER,
            vk::CompareOp::NEVER,
            true,
        )?;
        let edge_compare = sampler(
            vk::SamplerAddressMode::CLAMP_TO_EDGE,
            vk::CompareOp::ALWAYS,
            false,
        )?;

        Ok(ChainCtx {
            vk,
            shaders,
            pool,
            shared_constants,
            frame_constants,
            border_black,
            border_white,
            edge_compare,
            source_extent: extent,
            flow_extent: vk::Extent2D {
                width: (extent.width as f32 / params.flow) as u32,
                height: (extent.height as f32 / params.flow) as u32,
            },
            hdr: params.hdr,
            flow: params.flow,
            perf: params.perf,
            count,
        })
    }

    /// Transition every engine-owned image to GENERAL in one batch and
    /// wait for it.
    fn initialize_images(&self, vk: &VulkanContext) -> Result<(), Error> {
        let mut images = vec![self.black_image.handle()];
        self.mipmaps.prepare(&mut images);
        for i in 0..7 {
            self.alpha0[i].prepare(&mut images);
            self.alpha1[i].prepare(&mut images);
        }
        self.beta0.prepare(&mut images);
        self.beta1.prepare(&mut images);
        for pass in &self.passes {
            for i in 0..7 {
                pass.gamma0[i].prepare(&mut images);
                pass.gamma1[i].prepare(&mut images);
                if i >= 4 {
                    pass.delta0[i - 4].prepare(&mut images);
                    pass.delta1[i - 4].prepare(&mut images);
                }
            }
        }

        let barriers: Vec<vk::ImageMemoryBarrier> = images
            .into_iter()
            .map(|image| {
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::GENERAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(color_subresource_range())
            })
            .collect();

        let cmd = CommandBuffer::new(vk)
            .map_err(|e| Error::device("unable to initialize images").because(e))?;
        cmd.begin()
            .and_then(|_| {
                cmd.pipeline_barriers(&barriers);
                cmd.end()
            })
            .and_then(|_| cmd.submit_blocking(vk))
            .map_err(|e| Error::device("unable to initialize images").because(e))
    }

    /// Generate one batch of frames from the current source pair.
    ///
    /// The host must have signalled the sync timeline to this context's
    /// next expected value. On `Error::Timeout` the context is poisoned;
    /// further calls have undefined results.
    pub fn schedule_frames(&mut self) -> Result<(), Error> {
        // Gate on the previous main-pass batch.
        if self.fidx > 0 {
            let completed = self
                .fence
                .wait(FRAME_FENCE_TIMEOUT_NS)
                .map_err(|e| Error::device("unable to wait for frame fence").because(e))?;
            if !completed {
                return Err(Error::timeout(
                    "timed out waiting for previous frame batch to complete",
                ));
            }
        }
        self.fence
            .reset()
            .map_err(|e| Error::device("unable to reset frame fence").because(e))?;

        // Pre-pass: pyramid and analysis shared by every generated frame.
        let cmd = &self.cmdbufs[0];
        cmd.begin()
            .map_err(|e| Error::device("unable to record pre-pass").because(e))?;

        self.mipmaps.render(cmd, self.fidx);
        for i in (0..7).rev() {
            self.alpha0[i].render(cmd);
            self.alpha1[i].render(cmd, self.fidx);
        }
        self.beta0.render(cmd, self.fidx);
        self.beta1.render(cmd);

        cmd.end()
            .map_err(|e| Error::device("unable to record pre-pass").because(e))?;
        cmd.submit_timeline(
            (self.sync_semaphore.handle(), self.idx),
            (self.prepass_semaphore.handle(), self.idx),
            None,
        )
        .map_err(|e| Error::device("unable to submit pre-pass").because(e))?;

        self.idx += 1;

        // Main passes: one per destination image, each signalling the
        // next sync value. The last one carries the frame fence.
        for (k, pass) in self.passes.iter().enumerate() {
            let cmd = &self.cmdbufs[k + 1];
            cmd.begin()
                .map_err(|e| Error::device("unable to record main pass").because(e))?;

            for j in 0..7 {
                pass.gamma0[j].render(cmd, self.fidx);
                pass.gamma1[j].render(cmd);
                if j >= 4 {
                    pass.delta0[j - 4].render(cmd, self.fidx);
                    pass.delta1[j - 4].render(cmd);
                }
            }
            pass.generate.render(cmd, self.fidx);

            cmd.end()
                .map_err(|e| Error::device("unable to record main pass").because(e))?;
            cmd.submit_timeline(
                (self.prepass_semaphore.handle(), self.idx - 1),
                (self.sync_semaphore.handle(), self.idx + k as u64),
                (k == self.passes.len() - 1).then_some(&self.fence),
            )
            .map_err(|e| Error::device("unable to submit main pass").because(e))?;
        }

        self.idx += self.passes.len() as u64;
        self.fidx += 1;
        Ok(())
    }

    /// Real source pairs consumed so far.
    pub fn frame_index(&self) -> usize {
        self.fidx
    }

    /// Next timeline value this context will signal.
    pub fn next_timeline_value(&self) -> u64 {
        self.idx
    }

    /// Generated frames per call.
    pub fn frames_per_call(&self) -> usize {
        self.ctx.count
    }

    /// Extent the analysis chains run at, `source extent / flow`.
    pub fn flow_extent(&self) -> vk::Extent2D {
        self.ctx.flow_extent
    }
}
