//! pipeline 相关对象的可序列化描述
//!
//! 捕获时从 `vk::XxxCreateInfo` 读出所有字段（包括指针指向的数组），序列化为规范的 JSON；
//! 重建时在新的 device 上按描述重新调用 `vkCreateXxx`。描述中的 handle 以 `u64` 保存，
//! 重建之前由调用方把它们替换为新 device 上的 handle。

use std::{
    collections::BTreeMap,
    ffi::{CStr, CString},
    fmt,
};

use ash::vk::{self, Handle};
use serde::{Deserialize, Serialize};

use crate::{
    error::{VktError, VktResult},
    interface::DeviceInterface,
};

/// 序列化中使用的 handle
pub type RawHandle = u64;

/// 把 `(ptr, count)` 读成 slice，null 或者 0 返回空 slice
///
/// # Safety
/// `ptr` 非空时必须指向至少 `count` 个有效元素
unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

#[inline]
fn bool32(value: vk::Bool32) -> bool {
    value != vk::FALSE
}

/// 64 位 FNV-1a
pub fn calculate_hash(data: &str) -> u64 {
    data.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

/// 16 字节的 pipeline 身份：前 8 字节是 `test_path:json` 的 hash，后 8 字节是 json 本身的 hash
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineIdentifier(pub [u8; vk::UUID_SIZE]);

impl PipelineIdentifier {
    pub fn new(test_path: &str, json: &str) -> Self {
        let mut id = [0u8; vk::UUID_SIZE];
        id[..8].copy_from_slice(&calculate_hash(&format!("{test_path}:{json}")).to_le_bytes());
        id[8..].copy_from_slice(&calculate_hash(json).to_le_bytes());
        Self(id)
    }
}

impl fmt::Debug for PipelineIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// sampler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplerDesc {
    pub flags: u32,
    pub mag_filter: i32,
    pub min_filter: i32,
    pub mipmap_mode: i32,
    pub address_mode_u: i32,
    pub address_mode_v: i32,
    pub address_mode_w: i32,
    pub mip_lod_bias: f32,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub compare_op: i32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: i32,
    pub unnormalized_coordinates: bool,
}

impl SamplerDesc {
    pub fn from_vk(info: &vk::SamplerCreateInfo<'_>) -> Self {
        Self {
            flags: info.flags.as_raw(),
            mag_filter: info.mag_filter.as_raw(),
            min_filter: info.min_filter.as_raw(),
            mipmap_mode: info.mipmap_mode.as_raw(),
            address_mode_u: info.address_mode_u.as_raw(),
            address_mode_v: info.address_mode_v.as_raw(),
            address_mode_w: info.address_mode_w.as_raw(),
            mip_lod_bias: info.mip_lod_bias,
            anisotropy_enable: bool32(info.anisotropy_enable),
            max_anisotropy: info.max_anisotropy,
            compare_enable: bool32(info.compare_enable),
            compare_op: info.compare_op.as_raw(),
            min_lod: info.min_lod,
            max_lod: info.max_lod,
            border_color: info.border_color.as_raw(),
            unnormalized_coordinates: bool32(info.unnormalized_coordinates),
        }
    }

    pub fn to_vk(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .flags(vk::SamplerCreateFlags::from_raw(self.flags))
            .mag_filter(vk::Filter::from_raw(self.mag_filter))
            .min_filter(vk::Filter::from_raw(self.min_filter))
            .mipmap_mode(vk::SamplerMipmapMode::from_raw(self.mipmap_mode))
            .address_mode_u(vk::SamplerAddressMode::from_raw(self.address_mode_u))
            .address_mode_v(vk::SamplerAddressMode::from_raw(self.address_mode_v))
            .address_mode_w(vk::SamplerAddressMode::from_raw(self.address_mode_w))
            .mip_lod_bias(self.mip_lod_bias)
            .anisotropy_enable(self.anisotropy_enable)
            .max_anisotropy(self.max_anisotropy)
            .compare_enable(self.compare_enable)
            .compare_op(vk::CompareOp::from_raw(self.compare_op))
            .min_lod(self.min_lod)
            .max_lod(self.max_lod)
            .border_color(vk::BorderColor::from_raw(self.border_color))
            .unnormalized_coordinates(self.unnormalized_coordinates)
    }

    pub fn create(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::Sampler> {
        vkd.create_sampler(&self.to_vk())
    }
}

// shader module
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderModuleDesc {
    pub flags: u32,
    pub code: Vec<u32>,
}

impl ShaderModuleDesc {
    pub fn from_vk(info: &vk::ShaderModuleCreateInfo<'_>) -> Self {
        let code = unsafe { raw_slice(info.p_code, (info.code_size / 4) as u32) };
        Self {
            flags: info.flags.as_raw(),
            code: code.to_vec(),
        }
    }

    pub fn create(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::ShaderModule> {
        let info =
            vk::ShaderModuleCreateInfo::default().flags(vk::ShaderModuleCreateFlags::from_raw(self.flags)).code(&self.code);
        vkd.create_shader_module(&info)
    }
}

// descriptor set layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSetLayoutBindingDesc {
    pub binding: u32,
    pub descriptor_type: i32,
    pub descriptor_count: u32,
    pub stage_flags: u32,
    /// 为空表示没有 immutable sampler
    pub immutable_samplers: Vec<RawHandle>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSetLayoutDesc {
    pub flags: u32,
    pub bindings: Vec<DescriptorSetLayoutBindingDesc>,
}

impl DescriptorSetLayoutDesc {
    pub fn from_vk(info: &vk::DescriptorSetLayoutCreateInfo<'_>) -> Self {
        let bindings = unsafe { raw_slice(info.p_bindings, info.binding_count) };
        Self {
            flags: info.flags.as_raw(),
            bindings: bindings
                .iter()
                .map(|b| DescriptorSetLayoutBindingDesc {
                    binding: b.binding,
                    descriptor_type: b.descriptor_type.as_raw(),
                    descriptor_count: b.descriptor_count,
                    stage_flags: b.stage_flags.as_raw(),
                    immutable_samplers: unsafe { raw_slice(b.p_immutable_samplers, b.descriptor_count) }
                        .iter()
                        .map(|s| s.as_raw())
                        .collect(),
                })
                .collect(),
        }
    }

    /// 所有非 null 的 immutable sampler
    pub fn referenced_samplers(&self) -> impl Iterator<Item = RawHandle> + '_ {
        self.bindings.iter().flat_map(|b| b.immutable_samplers.iter().copied()).filter(|s| *s != 0)
    }

    pub fn create(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::DescriptorSetLayout> {
        let samplers = self
            .bindings
            .iter()
            .map(|b| b.immutable_samplers.iter().map(|s| vk::Sampler::from_raw(*s)).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let bindings = self
            .bindings
            .iter()
            .zip(&samplers)
            .map(|(b, samplers)| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(vk::DescriptorType::from_raw(b.descriptor_type))
                    .descriptor_count(b.descriptor_count)
                    .stage_flags(vk::ShaderStageFlags::from_raw(b.stage_flags));
                if samplers.is_empty() { binding } else { binding.immutable_samplers(samplers) }
            })
            .collect::<Vec<_>>();
        let info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::from_raw(self.flags))
            .bindings(&bindings);
        vkd.create_descriptor_set_layout(&info)
    }
}

// pipeline layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConstantRangeDesc {
    pub stage_flags: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLayoutDesc {
    pub flags: u32,
    pub set_layouts: Vec<RawHandle>,
    pub push_constant_ranges: Vec<PushConstantRangeDesc>,
}

impl PipelineLayoutDesc {
    pub fn from_vk(info: &vk::PipelineLayoutCreateInfo<'_>) -> Self {
        Self {
            flags: info.flags.as_raw(),
            set_layouts: unsafe { raw_slice(info.p_set_layouts, info.set_layout_count) }
                .iter()
                .map(|l| l.as_raw())
                .collect(),
            push_constant_ranges: unsafe { raw_slice(info.p_push_constant_ranges, info.push_constant_range_count) }
                .iter()
                .map(|r| PushConstantRangeDesc {
                    stage_flags: r.stage_flags.as_raw(),
                    offset: r.offset,
                    size: r.size,
                })
                .collect(),
        }
    }

    pub fn create(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::PipelineLayout> {
        let set_layouts = self.set_layouts.iter().map(|l| vk::DescriptorSetLayout::from_raw(*l)).collect::<Vec<_>>();
        let ranges = self
            .push_constant_ranges
            .iter()
            .map(|r| vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::from_raw(r.stage_flags),
                offset: r.offset,
                size: r.size,
            })
            .collect::<Vec<_>>();
        let info = vk::PipelineLayoutCreateInfo::default()
            .flags(vk::PipelineLayoutCreateFlags::from_raw(self.flags))
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        vkd.create_pipeline_layout(&info)
    }
}

// render pass
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDesc {
    pub flags: u32,
    pub format: i32,
    pub samples: u32,
    pub load_op: i32,
    pub store_op: i32,
    pub stencil_load_op: i32,
    pub stencil_store_op: i32,
    pub initial_layout: i32,
    pub final_layout: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRefDesc {
    pub attachment: u32,
    pub layout: i32,
    /// 只在 render pass 2 中有意义
    pub aspect_mask: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubpassDesc {
    pub flags: u32,
    pub pipeline_bind_point: i32,
    pub view_mask: u32,
    pub input_attachments: Vec<AttachmentRefDesc>,
    pub color_attachments: Vec<AttachmentRefDesc>,
    pub resolve_attachments: Vec<AttachmentRefDesc>,
    pub depth_stencil_attachment: Option<AttachmentRefDesc>,
    pub preserve_attachments: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubpassDependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: u32,
    pub dst_stage_mask: u32,
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
    pub dependency_flags: u32,
    pub view_offset: i32,
}

/// `VkRenderPassCreateInfo` 与 `VkRenderPassCreateInfo2` 共用一个描述，`version` 区分重建时使用的入口
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPassDesc {
    pub version: u32,
    pub flags: u32,
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<SubpassDependencyDesc>,
    pub correlated_view_masks: Vec<u32>,
}

impl AttachmentRefDesc {
    fn from_v1(r: &vk::AttachmentReference) -> Self {
        Self {
            attachment: r.attachment,
            layout: r.layout.as_raw(),
            aspect_mask: 0,
        }
    }

    fn from_v2(r: &vk::AttachmentReference2<'_>) -> Self {
        Self {
            attachment: r.attachment,
            layout: r.layout.as_raw(),
            aspect_mask: r.aspect_mask.as_raw(),
        }
    }

    fn to_v1(self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: self.attachment,
            layout: vk::ImageLayout::from_raw(self.layout),
        }
    }

    fn to_v2(self) -> vk::AttachmentReference2<'static> {
        vk::AttachmentReference2::default()
            .attachment(self.attachment)
            .layout(vk::ImageLayout::from_raw(self.layout))
            .aspect_mask(vk::ImageAspectFlags::from_raw(self.aspect_mask))
    }
}

impl AttachmentDesc {
    fn from_fields(
        flags: vk::AttachmentDescriptionFlags,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        ops: [vk::AttachmentLoadOp; 2],
        store_ops: [vk::AttachmentStoreOp; 2],
        layouts: [vk::ImageLayout; 2],
    ) -> Self {
        Self {
            flags: flags.as_raw(),
            format: format.as_raw(),
            samples: samples.as_raw(),
            load_op: ops[0].as_raw(),
            store_op: store_ops[0].as_raw(),
            stencil_load_op: ops[1].as_raw(),
            stencil_store_op: store_ops[1].as_raw(),
            initial_layout: layouts[0].as_raw(),
            final_layout: layouts[1].as_raw(),
        }
    }
}

impl RenderPassDesc {
    pub fn from_vk(info: &vk::RenderPassCreateInfo<'_>) -> Self {
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) };
        let subpasses = unsafe { raw_slice(info.p_subpasses, info.subpass_count) };
        let dependencies = unsafe { raw_slice(info.p_dependencies, info.dependency_count) };

        Self {
            version: 1,
            flags: info.flags.as_raw(),
            attachments: attachments
                .iter()
                .map(|a| {
                    AttachmentDesc::from_fields(
                        a.flags,
                        a.format,
                        a.samples,
                        [a.load_op, a.stencil_load_op],
                        [a.store_op, a.stencil_store_op],
                        [a.initial_layout, a.final_layout],
                    )
                })
                .collect(),
            subpasses: subpasses
                .iter()
                .map(|s| unsafe {
                    SubpassDesc {
                        flags: s.flags.as_raw(),
                        pipeline_bind_point: s.pipeline_bind_point.as_raw(),
                        view_mask: 0,
                        input_attachments: raw_slice(s.p_input_attachments, s.input_attachment_count)
                            .iter()
                            .map(AttachmentRefDesc::from_v1)
                            .collect(),
                        color_attachments: raw_slice(s.p_color_attachments, s.color_attachment_count)
                            .iter()
                            .map(AttachmentRefDesc::from_v1)
                            .collect(),
                        resolve_attachments: raw_slice(s.p_resolve_attachments, s.color_attachment_count)
                            .iter()
                            .map(AttachmentRefDesc::from_v1)
                            .collect(),
                        depth_stencil_attachment: s.p_depth_stencil_attachment.as_ref().map(AttachmentRefDesc::from_v1),
                        preserve_attachments: raw_slice(s.p_preserve_attachments, s.preserve_attachment_count).to_vec(),
                    }
                })
                .collect(),
            dependencies: dependencies
                .iter()
                .map(|d| SubpassDependencyDesc {
                    src_subpass: d.src_subpass,
                    dst_subpass: d.dst_subpass,
                    src_stage_mask: d.src_stage_mask.as_raw(),
                    dst_stage_mask: d.dst_stage_mask.as_raw(),
                    src_access_mask: d.src_access_mask.as_raw(),
                    dst_access_mask: d.dst_access_mask.as_raw(),
                    dependency_flags: d.dependency_flags.as_raw(),
                    view_offset: 0,
                })
                .collect(),
            correlated_view_masks: vec![],
        }
    }

    pub fn from_vk2(info: &vk::RenderPassCreateInfo2<'_>) -> Self {
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) };
        let subpasses = unsafe { raw_slice(info.p_subpasses, info.subpass_count) };
        let dependencies = unsafe { raw_slice(info.p_dependencies, info.dependency_count) };

        Self {
            version: 2,
            flags: info.flags.as_raw(),
            attachments: attachments
                .iter()
                .map(|a| {
                    AttachmentDesc::from_fields(
                        a.flags,
                        a.format,
                        a.samples,
                        [a.load_op, a.stencil_load_op],
                        [a.store_op, a.stencil_store_op],
                        [a.initial_layout, a.final_layout],
                    )
                })
                .collect(),
            subpasses: subpasses
                .iter()
                .map(|s| unsafe {
                    SubpassDesc {
                        flags: s.flags.as_raw(),
                        pipeline_bind_point: s.pipeline_bind_point.as_raw(),
                        view_mask: s.view_mask,
                        input_attachments: raw_slice(s.p_input_attachments, s.input_attachment_count)
                            .iter()
                            .map(AttachmentRefDesc::from_v2)
                            .collect(),
                        color_attachments: raw_slice(s.p_color_attachments, s.color_attachment_count)
                            .iter()
                            .map(AttachmentRefDesc::from_v2)
                            .collect(),
                        resolve_attachments: raw_slice(s.p_resolve_attachments, s.color_attachment_count)
                            .iter()
                            .map(AttachmentRefDesc::from_v2)
                            .collect(),
                        depth_stencil_attachment: s.p_depth_stencil_attachment.as_ref().map(AttachmentRefDesc::from_v2),
                        preserve_attachments: raw_slice(s.p_preserve_attachments, s.preserve_attachment_count).to_vec(),
                    }
                })
                .collect(),
            dependencies: dependencies
                .iter()
                .map(|d| SubpassDependencyDesc {
                    src_subpass: d.src_subpass,
                    dst_subpass: d.dst_subpass,
                    src_stage_mask: d.src_stage_mask.as_raw(),
                    dst_stage_mask: d.dst_stage_mask.as_raw(),
                    src_access_mask: d.src_access_mask.as_raw(),
                    dst_access_mask: d.dst_access_mask.as_raw(),
                    dependency_flags: d.dependency_flags.as_raw(),
                    view_offset: d.view_offset,
                })
                .collect(),
            correlated_view_masks: unsafe {
                raw_slice(info.p_correlated_view_masks, info.correlated_view_mask_count).to_vec()
            },
        }
    }

    pub fn create(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::RenderPass> {
        match self.version {
            1 => self.create_v1(vkd),
            2 => self.create_v2(vkd),
            v => Err(VktError::internal(format!("could not recognize render pass version {v}"))),
        }
    }

    fn create_v1(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::RenderPass> {
        let attachments = self
            .attachments
            .iter()
            .map(|a| vk::AttachmentDescription {
                flags: vk::AttachmentDescriptionFlags::from_raw(a.flags),
                format: vk::Format::from_raw(a.format),
                samples: vk::SampleCountFlags::from_raw(a.samples),
                load_op: vk::AttachmentLoadOp::from_raw(a.load_op),
                store_op: vk::AttachmentStoreOp::from_raw(a.store_op),
                stencil_load_op: vk::AttachmentLoadOp::from_raw(a.stencil_load_op),
                stencil_store_op: vk::AttachmentStoreOp::from_raw(a.stencil_store_op),
                initial_layout: vk::ImageLayout::from_raw(a.initial_layout),
                final_layout: vk::ImageLayout::from_raw(a.final_layout),
            })
            .collect::<Vec<_>>();

        struct SubpassRefs {
            input: Vec<vk::AttachmentReference>,
            color: Vec<vk::AttachmentReference>,
            resolve: Vec<vk::AttachmentReference>,
            depth: Option<vk::AttachmentReference>,
        }
        let refs = self
            .subpasses
            .iter()
            .map(|s| SubpassRefs {
                input: s.input_attachments.iter().map(|r| r.to_v1()).collect(),
                color: s.color_attachments.iter().map(|r| r.to_v1()).collect(),
                resolve: s.resolve_attachments.iter().map(|r| r.to_v1()).collect(),
                depth: s.depth_stencil_attachment.map(AttachmentRefDesc::to_v1),
            })
            .collect::<Vec<_>>();
        let subpasses = self
            .subpasses
            .iter()
            .zip(&refs)
            .map(|(s, r)| {
                let mut subpass = vk::SubpassDescription::default()
                    .flags(vk::SubpassDescriptionFlags::from_raw(s.flags))
                    .pipeline_bind_point(vk::PipelineBindPoint::from_raw(s.pipeline_bind_point))
                    .input_attachments(&r.input)
                    .color_attachments(&r.color)
                    .preserve_attachments(&s.preserve_attachments);
                if !r.resolve.is_empty() {
                    subpass = subpass.resolve_attachments(&r.resolve);
                }
                if let Some(depth) = r.depth.as_ref() {
                    subpass = subpass.depth_stencil_attachment(depth);
                }
                subpass
            })
            .collect::<Vec<_>>();
        let dependencies = self
            .dependencies
            .iter()
            .map(|d| vk::SubpassDependency {
                src_subpass: d.src_subpass,
                dst_subpass: d.dst_subpass,
                src_stage_mask: vk::PipelineStageFlags::from_raw(d.src_stage_mask),
                dst_stage_mask: vk::PipelineStageFlags::from_raw(d.dst_stage_mask),
                src_access_mask: vk::AccessFlags::from_raw(d.src_access_mask),
                dst_access_mask: vk::AccessFlags::from_raw(d.dst_access_mask),
                dependency_flags: vk::DependencyFlags::from_raw(d.dependency_flags),
            })
            .collect::<Vec<_>>();

        let info = vk::RenderPassCreateInfo::default()
            .flags(vk::RenderPassCreateFlags::from_raw(self.flags))
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        vkd.create_render_pass(&info)
    }

    fn create_v2(&self, vkd: &dyn DeviceInterface) -> VktResult<vk::RenderPass> {
        let attachments = self
            .attachments
            .iter()
            .map(|a| {
                vk::AttachmentDescription2::default()
                    .flags(vk::AttachmentDescriptionFlags::from_raw(a.flags))
                    .format(vk::Format::from_raw(a.format))
                    .samples(vk::SampleCountFlags::from_raw(a.samples))
                    .load_op(vk::AttachmentLoadOp::from_raw(a.load_op))
                    .store_op(vk::AttachmentStoreOp::from_raw(a.store_op))
                    .stencil_load_op(vk::AttachmentLoadOp::from_raw(a.stencil_load_op))
                    .stencil_store_op(vk::AttachmentStoreOp::from_raw(a.stencil_store_op))
                    .initial_layout(vk::ImageLayout::from_raw(a.initial_layout))
                    .final_layout(vk::ImageLayout::from_raw(a.final_layout))
            })
            .collect::<Vec<_>>();

        struct SubpassRefs {
            input: Vec<vk::AttachmentReference2<'static>>,
            color: Vec<vk::AttachmentReference2<'static>>,
            resolve: Vec<vk::AttachmentReference2<'static>>,
            depth: Option<vk::AttachmentReference2<'static>>,
        }
        let refs = self
            .subpasses
            .iter()
            .map(|s| SubpassRefs {
                input: s.input_attachments.iter().map(|r| r.to_v2()).collect(),
                color: s.color_attachments.iter().map(|r| r.to_v2()).collect(),
                resolve: s.resolve_attachments.iter().map(|r| r.to_v2()).collect(),
                depth: s.depth_stencil_attachment.map(AttachmentRefDesc::to_v2),
            })
            .collect::<Vec<_>>();
        let subpasses = self
            .subpasses
            .iter()
            .zip(&refs)
            .map(|(s, r)| {
                let mut subpass = vk::SubpassDescription2::default()
                    .flags(vk::SubpassDescriptionFlags::from_raw(s.flags))
                    .pipeline_bind_point(vk::PipelineBindPoint::from_raw(s.pipeline_bind_point))
                    .view_mask(s.view_mask)
                    .input_attachments(&r.input)
                    .color_attachments(&r.color)
                    .preserve_attachments(&s.preserve_attachments);
                if !r.resolve.is_empty() {
                    subpass = subpass.resolve_attachments(&r.resolve);
                }
                if let Some(depth) = r.depth.as_ref() {
                    subpass = subpass.depth_stencil_attachment(depth);
                }
                subpass
            })
            .collect::<Vec<_>>();
        let dependencies = self
            .dependencies
            .iter()
            .map(|d| {
                vk::SubpassDependency2::default()
                    .src_subpass(d.src_subpass)
                    .dst_subpass(d.dst_subpass)
                    .src_stage_mask(vk::PipelineStageFlags::from_raw(d.src_stage_mask))
                    .dst_stage_mask(vk::PipelineStageFlags::from_raw(d.dst_stage_mask))
                    .src_access_mask(vk::AccessFlags::from_raw(d.src_access_mask))
                    .dst_access_mask(vk::AccessFlags::from_raw(d.dst_access_mask))
                    .dependency_flags(vk::DependencyFlags::from_raw(d.dependency_flags))
                    .view_offset(d.view_offset)
            })
            .collect::<Vec<_>>();

        let info = vk::RenderPassCreateInfo2::default()
            .flags(vk::RenderPassCreateFlags::from_raw(self.flags))
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies)
            .correlated_view_masks(&self.correlated_view_masks);
        vkd.create_render_pass2(&info)
    }
}

// pipeline
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecializationEntryDesc {
    pub constant_id: u32,
    pub offset: u32,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecializationDesc {
    pub map_entries: Vec<SpecializationEntryDesc>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderStageDesc {
    pub flags: u32,
    pub stage: u32,
    pub module: RawHandle,
    pub name: String,
    pub specialization: Option<SpecializationDesc>,
}

impl ShaderStageDesc {
    pub fn from_vk(info: &vk::PipelineShaderStageCreateInfo<'_>) -> Self {
        let name = if info.p_name.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(info.p_name) }.to_string_lossy().into_owned()
        };
        let specialization = unsafe { info.p_specialization_info.as_ref() }.map(|spec| SpecializationDesc {
            map_entries: unsafe { raw_slice(spec.p_map_entries, spec.map_entry_count) }
                .iter()
                .map(|e| SpecializationEntryDesc {
                    constant_id: e.constant_id,
                    offset: e.offset,
                    size: e.size as u64,
                })
                .collect(),
            data: unsafe { raw_slice(spec.p_data as *const u8, spec.data_size as u32) }.to_vec(),
        });
        Self {
            flags: info.flags.as_raw(),
            stage: info.stage.as_raw(),
            module: info.module.as_raw(),
            name,
            specialization,
        }
    }
}

/// 重建 shader stage 时需要保持存活的数据
struct StageStorage {
    name: CString,
    map_entries: Vec<vk::SpecializationMapEntry>,
    spec: Option<vk::SpecializationInfo<'static>>,
}

impl StageStorage {
    fn new(desc: &ShaderStageDesc) -> VktResult<Self> {
        let name = CString::new(desc.name.as_str())
            .map_err(|_| VktError::internal(format!("invalid shader entry point name {:?}", desc.name)))?;
        let map_entries = desc
            .specialization
            .iter()
            .flat_map(|s| s.map_entries.iter())
            .map(|e| vk::SpecializationMapEntry {
                constant_id: e.constant_id,
                offset: e.offset,
                size: e.size as usize,
            })
            .collect();
        Ok(Self {
            name,
            map_entries,
            spec: None,
        })
    }

    fn stage<'a>(&'a mut self, desc: &'a ShaderStageDesc) -> vk::PipelineShaderStageCreateInfo<'a> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .flags(vk::PipelineShaderStageCreateFlags::from_raw(desc.flags))
            .stage(vk::ShaderStageFlags::from_raw(desc.stage))
            .module(vk::ShaderModule::from_raw(desc.module))
            .name(self.name.as_c_str());
        match desc.specialization.as_ref() {
            Some(spec) => {
                let mut info = vk::SpecializationInfo::default();
                info.map_entry_count = self.map_entries.len() as u32;
                info.p_map_entries = self.map_entries.as_ptr();
                info.data_size = spec.data.len();
                info.p_data = spec.data.as_ptr().cast();
                let spec_ref = self.spec.insert(info);
                stage.specialization_info(spec_ref)
            }
            None => stage,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttributeDesc {
    pub location: u32,
    pub binding: u32,
    pub format: i32,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexInputDesc {
    pub bindings: Vec<VertexBindingDesc>,
    pub attributes: Vec<VertexAttributeDesc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAssemblyDesc {
    pub topology: i32,
    pub primitive_restart_enable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewportStateDesc {
    pub viewport_count: u32,
    pub scissor_count: u32,
    /// `[x, y, width, height, min_depth, max_depth]`，动态 viewport 时为空
    pub viewports: Vec<[f32; 6]>,
    /// `[x, y, width, height]`，动态 scissor 时为空
    pub scissors: Vec<[i64; 4]>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RasterizationDesc {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: i32,
    pub cull_mode: u32,
    pub front_face: i32,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultisampleDesc {
    pub rasterization_samples: u32,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    pub sample_mask: Vec<u32>,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilOpDesc {
    pub fail_op: i32,
    pub pass_op: i32,
    pub depth_fail_op: i32,
    pub compare_op: i32,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl StencilOpDesc {
    fn from_vk(s: &vk::StencilOpState) -> Self {
        Self {
            fail_op: s.fail_op.as_raw(),
            pass_op: s.pass_op.as_raw(),
            depth_fail_op: s.depth_fail_op.as_raw(),
            compare_op: s.compare_op.as_raw(),
            compare_mask: s.compare_mask,
            write_mask: s.write_mask,
            reference: s.reference,
        }
    }

    fn to_vk(&self) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: vk::StencilOp::from_raw(self.fail_op),
            pass_op: vk::StencilOp::from_raw(self.pass_op),
            depth_fail_op: vk::StencilOp::from_raw(self.depth_fail_op),
            compare_op: vk::CompareOp::from_raw(self.compare_op),
            compare_mask: self.compare_mask,
            write_mask: self.write_mask,
            reference: self.reference,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthStencilDesc {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: i32,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front: StencilOpDesc,
    pub back: StencilOpDesc,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorBlendAttachmentDesc {
    pub blend_enable: bool,
    pub src_color_blend_factor: i32,
    pub dst_color_blend_factor: i32,
    pub color_blend_op: i32,
    pub src_alpha_blend_factor: i32,
    pub dst_alpha_blend_factor: i32,
    pub alpha_blend_op: i32,
    pub color_write_mask: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorBlendDesc {
    pub logic_op_enable: bool,
    pub logic_op: i32,
    pub attachments: Vec<ColorBlendAttachmentDesc>,
    pub blend_constants: [f32; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphicsPipelineDesc {
    pub flags: u32,
    pub stages: Vec<ShaderStageDesc>,
    pub vertex_input: Option<VertexInputDesc>,
    pub input_assembly: Option<InputAssemblyDesc>,
    pub patch_control_points: Option<u32>,
    pub viewport: Option<ViewportStateDesc>,
    pub rasterization: Option<RasterizationDesc>,
    pub multisample: Option<MultisampleDesc>,
    pub depth_stencil: Option<DepthStencilDesc>,
    pub color_blend: Option<ColorBlendDesc>,
    pub dynamic_states: Vec<i32>,
    pub layout: RawHandle,
    pub render_pass: RawHandle,
    pub subpass: u32,
}

impl GraphicsPipelineDesc {
    pub fn from_vk(info: &vk::GraphicsPipelineCreateInfo<'_>) -> Self {
        unsafe {
            let vertex_input = info.p_vertex_input_state.as_ref().map(|v| VertexInputDesc {
                bindings: raw_slice(v.p_vertex_binding_descriptions, v.vertex_binding_description_count)
                    .iter()
                    .map(|b| VertexBindingDesc {
                        binding: b.binding,
                        stride: b.stride,
                        input_rate: b.input_rate.as_raw(),
                    })
                    .collect(),
                attributes: raw_slice(v.p_vertex_attribute_descriptions, v.vertex_attribute_description_count)
                    .iter()
                    .map(|a| VertexAttributeDesc {
                        location: a.location,
                        binding: a.binding,
                        format: a.format.as_raw(),
                        offset: a.offset,
                    })
                    .collect(),
            });
            let viewport = info.p_viewport_state.as_ref().map(|v| ViewportStateDesc {
                viewport_count: v.viewport_count,
                scissor_count: v.scissor_count,
                viewports: raw_slice(v.p_viewports, v.viewport_count)
                    .iter()
                    .map(|vp| [vp.x, vp.y, vp.width, vp.height, vp.min_depth, vp.max_depth])
                    .collect(),
                scissors: raw_slice(v.p_scissors, v.scissor_count)
                    .iter()
                    .map(|s| [s.offset.x as i64, s.offset.y as i64, s.extent.width as i64, s.extent.height as i64])
                    .collect(),
            });
            let multisample = info.p_multisample_state.as_ref().map(|m| {
                // sample mask 的长度是 ceil(samples / 32)
                let mask_words = m.rasterization_samples.as_raw().div_ceil(32);
                MultisampleDesc {
                    rasterization_samples: m.rasterization_samples.as_raw(),
                    sample_shading_enable: bool32(m.sample_shading_enable),
                    min_sample_shading: m.min_sample_shading,
                    sample_mask: raw_slice(m.p_sample_mask, mask_words).to_vec(),
                    alpha_to_coverage_enable: bool32(m.alpha_to_coverage_enable),
                    alpha_to_one_enable: bool32(m.alpha_to_one_enable),
                }
            });

            Self {
                flags: info.flags.as_raw(),
                stages: raw_slice(info.p_stages, info.stage_count).iter().map(ShaderStageDesc::from_vk).collect(),
                vertex_input,
                input_assembly: info.p_input_assembly_state.as_ref().map(|ia| InputAssemblyDesc {
                    topology: ia.topology.as_raw(),
                    primitive_restart_enable: bool32(ia.primitive_restart_enable),
                }),
                patch_control_points: info.p_tessellation_state.as_ref().map(|t| t.patch_control_points),
                viewport,
                rasterization: info.p_rasterization_state.as_ref().map(|r| RasterizationDesc {
                    depth_clamp_enable: bool32(r.depth_clamp_enable),
                    rasterizer_discard_enable: bool32(r.rasterizer_discard_enable),
                    polygon_mode: r.polygon_mode.as_raw(),
                    cull_mode: r.cull_mode.as_raw(),
                    front_face: r.front_face.as_raw(),
                    depth_bias_enable: bool32(r.depth_bias_enable),
                    depth_bias_constant_factor: r.depth_bias_constant_factor,
                    depth_bias_clamp: r.depth_bias_clamp,
                    depth_bias_slope_factor: r.depth_bias_slope_factor,
                    line_width: r.line_width,
                }),
                multisample,
                depth_stencil: info.p_depth_stencil_state.as_ref().map(|d| DepthStencilDesc {
                    depth_test_enable: bool32(d.depth_test_enable),
                    depth_write_enable: bool32(d.depth_write_enable),
                    depth_compare_op: d.depth_compare_op.as_raw(),
                    depth_bounds_test_enable: bool32(d.depth_bounds_test_enable),
                    stencil_test_enable: bool32(d.stencil_test_enable),
                    front: StencilOpDesc::from_vk(&d.front),
                    back: StencilOpDesc::from_vk(&d.back),
                    min_depth_bounds: d.min_depth_bounds,
                    max_depth_bounds: d.max_depth_bounds,
                }),
                color_blend: info.p_color_blend_state.as_ref().map(|c| ColorBlendDesc {
                    logic_op_enable: bool32(c.logic_op_enable),
                    logic_op: c.logic_op.as_raw(),
                    attachments: raw_slice(c.p_attachments, c.attachment_count)
                        .iter()
                        .map(|a| ColorBlendAttachmentDesc {
                            blend_enable: bool32(a.blend_enable),
                            src_color_blend_factor: a.src_color_blend_factor.as_raw(),
                            dst_color_blend_factor: a.dst_color_blend_factor.as_raw(),
                            color_blend_op: a.color_blend_op.as_raw(),
                            src_alpha_blend_factor: a.src_alpha_blend_factor.as_raw(),
                            dst_alpha_blend_factor: a.dst_alpha_blend_factor.as_raw(),
                            alpha_blend_op: a.alpha_blend_op.as_raw(),
                            color_write_mask: a.color_write_mask.as_raw(),
                        })
                        .collect(),
                    blend_constants: c.blend_constants,
                }),
                dynamic_states: info
                    .p_dynamic_state
                    .as_ref()
                    .map(|d| raw_slice(d.p_dynamic_states, d.dynamic_state_count).iter().map(|s| s.as_raw()).collect())
                    .unwrap_or_default(),
                layout: info.layout.as_raw(),
                render_pass: info.render_pass.as_raw(),
                subpass: info.subpass,
            }
        }
    }

    /// 在 `vkd` 上以 `cache` 重建 pipeline，所有 handle 必须已经属于 `vkd`
    pub fn create(&self, vkd: &dyn DeviceInterface, cache: vk::PipelineCache) -> VktResult<vk::Pipeline> {
        let mut stage_storage = self.stages.iter().map(StageStorage::new).collect::<VktResult<Vec<_>>>()?;
        let stages = stage_storage.iter_mut().zip(&self.stages).map(|(s, d)| s.stage(d)).collect::<Vec<_>>();

        let vertex_bindings = self
            .vertex_input
            .iter()
            .flat_map(|v| v.bindings.iter())
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: vk::VertexInputRate::from_raw(b.input_rate),
            })
            .collect::<Vec<_>>();
        let vertex_attributes = self
            .vertex_input
            .iter()
            .flat_map(|v| v.attributes.iter())
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: vk::Format::from_raw(a.format),
                offset: a.offset,
            })
            .collect::<Vec<_>>();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = self.input_assembly.as_ref().map(|ia| {
            vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(vk::PrimitiveTopology::from_raw(ia.topology))
                .primitive_restart_enable(ia.primitive_restart_enable)
        });
        let tessellation = self
            .patch_control_points
            .map(|points| vk::PipelineTessellationStateCreateInfo::default().patch_control_points(points));

        let viewports = self
            .viewport
            .iter()
            .flat_map(|v| v.viewports.iter())
            .map(|v| vk::Viewport {
                x: v[0],
                y: v[1],
                width: v[2],
                height: v[3],
                min_depth: v[4],
                max_depth: v[5],
            })
            .collect::<Vec<_>>();
        let scissors = self
            .viewport
            .iter()
            .flat_map(|v| v.scissors.iter())
            .map(|s| vk::Rect2D {
                offset: vk::Offset2D {
                    x: s[0] as i32,
                    y: s[1] as i32,
                },
                extent: vk::Extent2D {
                    width: s[2] as u32,
                    height: s[3] as u32,
                },
            })
            .collect::<Vec<_>>();
        let viewport = self.viewport.as_ref().map(|v| {
            let mut state = vk::PipelineViewportStateCreateInfo::default()
                .viewport_count(v.viewport_count)
                .scissor_count(v.scissor_count);
            if !viewports.is_empty() {
                state.p_viewports = viewports.as_ptr();
            }
            if !scissors.is_empty() {
                state.p_scissors = scissors.as_ptr();
            }
            state
        });

        let rasterization = self.rasterization.as_ref().map(|r| {
            vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(r.depth_clamp_enable)
                .rasterizer_discard_enable(r.rasterizer_discard_enable)
                .polygon_mode(vk::PolygonMode::from_raw(r.polygon_mode))
                .cull_mode(vk::CullModeFlags::from_raw(r.cull_mode))
                .front_face(vk::FrontFace::from_raw(r.front_face))
                .depth_bias_enable(r.depth_bias_enable)
                .depth_bias_constant_factor(r.depth_bias_constant_factor)
                .depth_bias_clamp(r.depth_bias_clamp)
                .depth_bias_slope_factor(r.depth_bias_slope_factor)
                .line_width(r.line_width)
        });
        let multisample = self.multisample.as_ref().map(|m| {
            let mut state = vk::PipelineMultisampleStateCreateInfo::default()
                .rasterization_samples(vk::SampleCountFlags::from_raw(m.rasterization_samples))
                .sample_shading_enable(m.sample_shading_enable)
                .min_sample_shading(m.min_sample_shading)
                .alpha_to_coverage_enable(m.alpha_to_coverage_enable)
                .alpha_to_one_enable(m.alpha_to_one_enable);
            if !m.sample_mask.is_empty() {
                state.p_sample_mask = m.sample_mask.as_ptr();
            }
            state
        });
        let depth_stencil = self.depth_stencil.as_ref().map(|d| {
            vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(d.depth_test_enable)
                .depth_write_enable(d.depth_write_enable)
                .depth_compare_op(vk::CompareOp::from_raw(d.depth_compare_op))
                .depth_bounds_test_enable(d.depth_bounds_test_enable)
                .stencil_test_enable(d.stencil_test_enable)
                .front(d.front.to_vk())
                .back(d.back.to_vk())
                .min_depth_bounds(d.min_depth_bounds)
                .max_depth_bounds(d.max_depth_bounds)
        });

        let blend_attachments = self
            .color_blend
            .iter()
            .flat_map(|c| c.attachments.iter())
            .map(|a| vk::PipelineColorBlendAttachmentState {
                blend_enable: a.blend_enable.into(),
                src_color_blend_factor: vk::BlendFactor::from_raw(a.src_color_blend_factor),
                dst_color_blend_factor: vk::BlendFactor::from_raw(a.dst_color_blend_factor),
                color_blend_op: vk::BlendOp::from_raw(a.color_blend_op),
                src_alpha_blend_factor: vk::BlendFactor::from_raw(a.src_alpha_blend_factor),
                dst_alpha_blend_factor: vk::BlendFactor::from_raw(a.dst_alpha_blend_factor),
                alpha_blend_op: vk::BlendOp::from_raw(a.alpha_blend_op),
                color_write_mask: vk::ColorComponentFlags::from_raw(a.color_write_mask),
            })
            .collect::<Vec<_>>();
        let color_blend = self.color_blend.as_ref().map(|c| {
            vk::PipelineColorBlendStateCreateInfo::default()
                .logic_op_enable(c.logic_op_enable)
                .logic_op(vk::LogicOp::from_raw(c.logic_op))
                .attachments(&blend_attachments)
                .blend_constants(c.blend_constants)
        });

        let dynamic_states = self.dynamic_states.iter().map(|s| vk::DynamicState::from_raw(*s)).collect::<Vec<_>>();
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut info = vk::GraphicsPipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::from_raw(self.flags))
            .stages(&stages)
            .layout(vk::PipelineLayout::from_raw(self.layout))
            .render_pass(vk::RenderPass::from_raw(self.render_pass))
            .subpass(self.subpass)
            .base_pipeline_index(-1);
        if self.vertex_input.is_some() {
            info = info.vertex_input_state(&vertex_input);
        }
        if let Some(state) = input_assembly.as_ref() {
            info = info.input_assembly_state(state);
        }
        if let Some(state) = tessellation.as_ref() {
            info = info.tessellation_state(state);
        }
        if let Some(state) = viewport.as_ref() {
            info = info.viewport_state(state);
        }
        if let Some(state) = rasterization.as_ref() {
            info = info.rasterization_state(state);
        }
        if let Some(state) = multisample.as_ref() {
            info = info.multisample_state(state);
        }
        if let Some(state) = depth_stencil.as_ref() {
            info = info.depth_stencil_state(state);
        }
        if let Some(state) = color_blend.as_ref() {
            info = info.color_blend_state(state);
        }
        if !dynamic_states.is_empty() {
            info = info.dynamic_state(&dynamic);
        }

        let pipelines = vkd.create_graphics_pipelines(cache, std::slice::from_ref(&info))?;
        pipelines.first().copied().ok_or_else(|| VktError::internal("vkCreateGraphicsPipelines returned no pipeline"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePipelineDesc {
    pub flags: u32,
    pub stage: ShaderStageDesc,
    pub layout: RawHandle,
}

impl ComputePipelineDesc {
    pub fn from_vk(info: &vk::ComputePipelineCreateInfo<'_>) -> Self {
        Self {
            flags: info.flags.as_raw(),
            stage: ShaderStageDesc::from_vk(&info.stage),
            layout: info.layout.as_raw(),
        }
    }

    pub fn create(&self, vkd: &dyn DeviceInterface, cache: vk::PipelineCache) -> VktResult<vk::Pipeline> {
        let mut storage = StageStorage::new(&self.stage)?;
        let info = vk::ComputePipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::from_raw(self.flags))
            .stage(storage.stage(&self.stage))
            .layout(vk::PipelineLayout::from_raw(self.layout))
            .base_pipeline_index(-1);
        let pipelines = vkd.create_compute_pipelines(cache, std::slice::from_ref(&info))?;
        pipelines.first().copied().ok_or_else(|| VktError::internal("vkCreateComputePipelines returned no pipeline"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "desc")]
pub enum PipelineDesc {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

impl PipelineDesc {
    /// 规范的 JSON 文本，作为 hash 的输入
    pub fn to_json(&self) -> VktResult<String> {
        serde_json::to_string(self).map_err(|e| VktError::internal(format!("failed to serialize pipeline: {e}")))
    }

    /// pipeline 直接引用的所有 shader module
    pub fn shader_modules(&self) -> Vec<RawHandle> {
        match self {
            Self::Graphics(g) => g.stages.iter().map(|s| s.module).collect(),
            Self::Compute(c) => vec![c.stage.module],
        }
    }

    pub fn layout(&self) -> RawHandle {
        match self {
            Self::Graphics(g) => g.layout,
            Self::Compute(c) => c.layout,
        }
    }

    pub fn render_pass(&self) -> Option<RawHandle> {
        match self {
            Self::Graphics(g) => Some(g.render_pass),
            Self::Compute(_) => None,
        }
    }

    pub fn create(&self, vkd: &dyn DeviceInterface, cache: vk::PipelineCache) -> VktResult<vk::Pipeline> {
        match self {
            Self::Graphics(g) => g.create(vkd, cache),
            Self::Compute(c) => c.create(vkd, cache),
        }
    }
}

/// 一个被捕获的 pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntry {
    pub identifier: PipelineIdentifier,
    pub desc: PipelineDesc,
}

/// `VkDeviceObjectReservationCreateInfo` 中的对象数量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectReservation {
    pub semaphore_request_count: u32,
    pub command_buffer_request_count: u32,
    pub fence_request_count: u32,
    pub device_memory_request_count: u32,
    pub buffer_request_count: u32,
    pub image_request_count: u32,
    pub event_request_count: u32,
    pub query_pool_request_count: u32,
    pub buffer_view_request_count: u32,
    pub image_view_request_count: u32,
    pub pipeline_cache_request_count: u32,
    pub pipeline_layout_request_count: u32,
    pub render_pass_request_count: u32,
    pub graphics_pipeline_request_count: u32,
    pub compute_pipeline_request_count: u32,
    pub descriptor_set_layout_request_count: u32,
    pub sampler_request_count: u32,
    pub descriptor_pool_request_count: u32,
    pub descriptor_set_request_count: u32,
    pub framebuffer_request_count: u32,
    pub command_pool_request_count: u32,
    pub sampler_ycbcr_conversion_request_count: u32,
}

/// 整个 cache 构建的输入：被 pipeline 引用的所有对象
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCacheInput {
    pub memory_reservation: ObjectReservation,
    pub samplers: BTreeMap<RawHandle, SamplerDesc>,
    pub shader_modules: BTreeMap<RawHandle, ShaderModuleDesc>,
    pub render_passes: BTreeMap<RawHandle, RenderPassDesc>,
    pub descriptor_set_layouts: BTreeMap<RawHandle, DescriptorSetLayoutDesc>,
    pub pipeline_layouts: BTreeMap<RawHandle, PipelineLayoutDesc>,
    pub pipelines: Vec<PipelineEntry>,
}

impl PipelineCacheInput {
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
            && self.shader_modules.is_empty()
            && self.render_passes.is_empty()
            && self.descriptor_set_layouts.is_empty()
            && self.pipeline_layouts.is_empty()
            && self.pipelines.is_empty()
    }

    pub fn to_json(&self) -> VktResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VktError::internal(format!("failed to serialize pipeline cache input: {e}")))
    }

    pub fn from_json(json: &str) -> VktResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| VktError::internal(format!("failed to parse pipeline cache input: {e}")))
    }
}

/// 单个 pipeline 在 pipeline pool 中需要的大小
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSize {
    pub identifier: PipelineIdentifier,
    pub size: u64,
    pub count: u32,
}

/// `VkPipelinePoolSize`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinePoolSize {
    pub pool_entry_size: u64,
    pub pool_entry_count: u32,
}

/// pipeline entry 大小的基础部分
pub const PIPELINE_POOL_ENTRY_BASE_SIZE: u64 = 64 * 1024;
/// pipeline entry 大小的对齐粒度
pub const PIPELINE_POOL_ENTRY_GRANULARITY: u64 = 1024;

/// 由序列化描述的长度估算 pipeline entry 大小
pub fn estimate_pipeline_size(json_len: usize) -> u64 {
    (json_len as u64).div_ceil(PIPELINE_POOL_ENTRY_GRANULARITY) * PIPELINE_POOL_ENTRY_GRANULARITY
        + PIPELINE_POOL_ENTRY_BASE_SIZE
}

/// 相同大小的 pipeline 合并为一个 pool entry，按大小升序
pub fn pipeline_pool_sizes(sizes: &[PipelineSize]) -> Vec<PipelinePoolSize> {
    let mut grouped = BTreeMap::<u64, u32>::new();
    for size in sizes {
        *grouped.entry(size.size).or_default() += size.count;
    }
    grouped
        .into_iter()
        .map(|(pool_entry_size, pool_entry_count)| PipelinePoolSize {
            pool_entry_size,
            pool_entry_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(calculate_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(calculate_hash("a"), 0xaf63_dc4c_8601_ec8c);
        assert_ne!(calculate_hash("pipeline-a"), calculate_hash("pipeline-b"));
    }

    #[test]
    fn test_pipeline_identifier_depends_on_test_path() {
        let a = PipelineIdentifier::new("dEQP-VK.a", "{}");
        let b = PipelineIdentifier::new("dEQP-VK.b", "{}");
        assert_ne!(a, b);
        // 后半部分只依赖 json
        assert_eq!(a.0[8..], b.0[8..]);
        assert_eq!(a, PipelineIdentifier::new("dEQP-VK.a", "{}"));
    }

    #[test]
    fn test_descriptor_set_layout_capture() {
        let samplers = [vk::Sampler::from_raw(7), vk::Sampler::null()];
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .immutable_samplers(&samplers),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX),
        ];
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let desc = DescriptorSetLayoutDesc::from_vk(&info);

        assert_eq!(desc.bindings.len(), 2);
        assert_eq!(desc.bindings[0].descriptor_count, 2);
        assert_eq!(desc.referenced_samplers().collect::<Vec<_>>(), vec![7]);
        assert!(desc.bindings[1].immutable_samplers.is_empty());
    }

    #[test]
    fn test_compute_pipeline_capture() {
        let name = c"main";
        let entries = [vk::SpecializationMapEntry {
            constant_id: 3,
            offset: 0,
            size: 4,
        }];
        let data = 42u32.to_le_bytes();
        let spec = vk::SpecializationInfo::default().map_entries(&entries).data(&data);
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(vk::ShaderModule::from_raw(11))
                    .name(name)
                    .specialization_info(&spec),
            )
            .layout(vk::PipelineLayout::from_raw(5));

        let desc = PipelineDesc::Compute(ComputePipelineDesc::from_vk(&info));
        assert_eq!(desc.shader_modules(), vec![11]);
        assert_eq!(desc.layout(), 5);
        assert_eq!(desc.render_pass(), None);

        let PipelineDesc::Compute(compute) = &desc else {
            panic!("unexpected pipeline kind");
        };
        assert_eq!(compute.stage.name, "main");
        let spec = compute.stage.specialization.as_ref().unwrap();
        assert_eq!(spec.data, data.to_vec());
        assert_eq!(spec.map_entries[0].constant_id, 3);

        // 同样的描述得到同样的 JSON
        assert_eq!(desc.to_json().unwrap(), desc.clone().to_json().unwrap());
    }

    #[test]
    fn test_render_pass_capture() {
        let attachments = [vk::AttachmentDescription::default()
            .format(vk::Format::R8G8B8A8_UNORM)
            .samples(vk::SampleCountFlags::TYPE_1)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let color = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color)];
        let info = vk::RenderPassCreateInfo::default().attachments(&attachments).subpasses(&subpasses);

        let desc = RenderPassDesc::from_vk(&info);
        assert_eq!(desc.version, 1);
        assert_eq!(desc.attachments[0].format, vk::Format::R8G8B8A8_UNORM.as_raw());
        assert_eq!(desc.subpasses[0].color_attachments.len(), 1);
        assert!(desc.subpasses[0].resolve_attachments.is_empty());
        assert!(desc.subpasses[0].depth_stencil_attachment.is_none());
    }

    #[test]
    fn test_cache_input_json_keeps_handles() {
        let mut input = PipelineCacheInput::default();
        input.shader_modules.insert(
            3,
            ShaderModuleDesc {
                flags: 0,
                code: vec![0x0723_0203, 1, 2],
            },
        );
        let json = input.to_json().unwrap();
        let parsed = PipelineCacheInput::from_json(&json).unwrap();
        assert_eq!(parsed, input);
        assert!(PipelineCacheInput::from_json("not json").is_err());
    }

    #[test]
    fn test_pool_sizes_grouped_and_sorted() {
        assert_eq!(estimate_pipeline_size(1), PIPELINE_POOL_ENTRY_BASE_SIZE + 1024);
        assert_eq!(estimate_pipeline_size(2048), PIPELINE_POOL_ENTRY_BASE_SIZE + 2048);

        let id = PipelineIdentifier::default();
        let sizes = [
            PipelineSize {
                identifier: id,
                size: 3000,
                count: 1,
            },
            PipelineSize {
                identifier: id,
                size: 1000,
                count: 2,
            },
            PipelineSize {
                identifier: id,
                size: 3000,
                count: 1,
            },
        ];
        assert_eq!(
            pipeline_pool_sizes(&sizes),
            vec![
                PipelinePoolSize {
                    pool_entry_size: 1000,
                    pool_entry_count: 2
                },
                PipelinePoolSize {
                    pool_entry_size: 3000,
                    pool_entry_count: 2
                },
            ]
        );
    }
}
