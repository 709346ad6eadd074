//! Fullscreen-triangle blit used for scaling and format conversion.

use anyhow::{anyhow, Context, Result};
use windows::core::s;
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;

use crate::format::TextureDesc;

const BLIT_HLSL: &str = r#"
struct VsOut {
    float4 pos : SV_POSITION;
    float2 uv : TEXCOORD0;
};

VsOut vs_main(uint id : SV_VertexID) {
    VsOut o;
    o.uv = float2((id << 1) & 2, id & 2);
    o.pos = float4(o.uv * float2(2.0, -2.0) + float2(-1.0, 1.0), 0.0, 1.0);
    return o;
}

Texture2D source : register(t0);
SamplerState linear_clamp : register(s0);

float4 ps_main(VsOut i) : SV_TARGET {
    return source.Sample(linear_clamp, i.uv);
}
"#;

pub(super) struct BlitPipeline {
    vs: ID3D11VertexShader,
    ps: ID3D11PixelShader,
    sampler: ID3D11SamplerState,
}

fn compile(entry: windows::core::PCSTR, target: windows::core::PCSTR) -> Result<ID3DBlob> {
    let mut blob: Option<ID3DBlob> = None;
    let mut error_blob: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            BLIT_HLSL.as_ptr() as *const _,
            BLIT_HLSL.len(),
            None,
            None,
            None,
            entry,
            target,
            0,
            0,
            &mut blob,
            Some(&mut error_blob),
        )
    };
    if let Err(e) = result {
        let detail = error_blob
            .map(|err| unsafe {
                let bytes = std::slice::from_raw_parts(
                    err.GetBufferPointer() as *const u8,
                    err.GetBufferSize(),
                );
                String::from_utf8_lossy(bytes).into_owned()
            })
            .unwrap_or_default();
        return Err(anyhow!("D3DCompile failed: {e} {detail}"));
    }
    blob.context("D3DCompile returned no bytecode")
}

fn bytecode(blob: &ID3DBlob) -> &[u8] {
    // SAFETY: the blob owns GetBufferSize() bytes for its lifetime.
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    }
}

impl BlitPipeline {
    pub(super) fn new(device: &ID3D11Device) -> Result<Self> {
        let vs_blob = compile(s!("vs_main"), s!("vs_5_0")).context("blit vertex shader")?;
        let ps_blob = compile(s!("ps_main"), s!("ps_5_0")).context("blit pixel shader")?;

        let mut vs = None;
        unsafe { device.CreateVertexShader(bytecode(&vs_blob), None, Some(&mut vs as *mut _)) }
            .map_err(|e| anyhow!("Failed to create blit vertex shader: {e}"))?;
        let vs = vs.ok_or_else(|| anyhow!("D3D11 CreateVertexShader returned null"))?;

        let mut ps = None;
        unsafe { device.CreatePixelShader(bytecode(&ps_blob), None, Some(&mut ps as *mut _)) }
            .map_err(|e| anyhow!("Failed to create blit pixel shader: {e}"))?;
        let ps = ps.ok_or_else(|| anyhow!("D3D11 CreatePixelShader returned null"))?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
            ..Default::default()
        };
        let mut sampler = None;
        unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler as *mut _)) }
            .map_err(|e| anyhow!("Failed to create D3D11 sampler: {e}"))?;
        let sampler = sampler.ok_or_else(|| anyhow!("D3D11 CreateSamplerState returned null"))?;

        Ok(Self { vs, ps, sampler })
    }

    /// Draw `src` over the whole of `dst`. Unbinds everything afterwards so
    /// `src` can be copied or shared immediately.
    pub(super) fn draw(
        &self,
        device: &ID3D11Device,
        ctx: &ID3D11DeviceContext,
        dst: &ID3D11Texture2D,
        dst_desc: TextureDesc,
        src: &ID3D11Texture2D,
    ) -> Result<()> {
        let mut rtv = None;
        unsafe { device.CreateRenderTargetView(dst, None, Some(&mut rtv as *mut _)) }
            .map_err(|e| anyhow!("Failed to create RTV for blit: {e}"))?;
        let rtv = rtv.ok_or_else(|| anyhow!("D3D11 CreateRTV returned null"))?;

        let mut srv = None;
        unsafe { device.CreateShaderResourceView(src, None, Some(&mut srv as *mut _)) }
            .map_err(|e| anyhow!("Failed to create SRV for blit: {e}"))?;

        unsafe {
            let viewport = D3D11_VIEWPORT {
                TopLeftX: 0.0,
                TopLeftY: 0.0,
                Width: dst_desc.width as f32,
                Height: dst_desc.height as f32,
                MinDepth: 0.0,
                MaxDepth: 1.0,
            };
            ctx.RSSetViewports(Some(&[viewport]));

            ctx.IASetInputLayout(None);
            ctx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            ctx.VSSetShader(&self.vs, None);
            ctx.PSSetShader(&self.ps, None);
            ctx.PSSetShaderResources(0, &[srv]);
            ctx.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            ctx.OMSetRenderTargets(Some(&[Some(rtv)]), None);

            ctx.Draw(3, 0);

            let null_rtvs: [Option<ID3D11RenderTargetView>; 1] = Default::default();
            ctx.OMSetRenderTargets(Some(&null_rtvs), None);
            let null_srvs: [Option<ID3D11ShaderResourceView>; 1] = Default::default();
            ctx.PSSetShaderResources(0, &null_srvs);
        }
        Ok(())
    }
}
