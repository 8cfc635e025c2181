//! Wrapper source generation.

use crate::emitter::CodeEmitter;
use crate::error::{CodegenError, Result};
use crate::options::GeneratorOptions;
use crate::plan::{PlannedArg, WrapperPlan, CACHE_CLEANUP_FN, STATUS_LOCAL};
use crate::signature::FunctionSignature;
use crate::strategy::{strategy_for, BackendStrategy};
use torchbridge_core::{Backend, Feature, Target};
use torchbridge_tracing::{debug, info, perf_span, warn};

/// Generates one host-framework wrapper per kernel signature.
///
/// Generation is a pure function of the signatures, the target and the
/// options: the same inputs always produce byte-identical source.
#[derive(Debug, Clone)]
pub struct WrapperGenerator {
    target: Target,
    options: GeneratorOptions,
}

impl WrapperGenerator {
    pub fn new(target: Target, options: GeneratorOptions) -> Self {
        Self { target, options }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn options(&self) -> GeneratorOptions {
        self.options
    }

    fn strategy(&self) -> &'static dyn BackendStrategy {
        strategy_for(self.target.backend())
    }

    /// Check the target can host wrappers at all.
    pub fn check_target(&self) -> Result<()> {
        if self.target.backend() == Backend::Cuda && !self.target.has_feature(&Feature::UserContext) {
            return Err(CodegenError::MissingUserContextFeature {
                target: self.target.to_string(),
            });
        }
        Ok(())
    }

    /// Lower every signature, failing on the first invalid one.
    pub fn plan(&self, signatures: &[FunctionSignature]) -> Result<Vec<WrapperPlan>> {
        self.check_target()?;
        let strategy = self.strategy();

        let mut plans = Vec::with_capacity(signatures.len());
        for signature in signatures {
            let plan = WrapperPlan::from_signature(signature, strategy)?;
            if !plan.has_user_context() {
                if strategy.requires_context_parameter() {
                    return Err(CodegenError::MissingContextParameter {
                        function: plan.qualified_name,
                        backend: strategy.backend().to_string(),
                    });
                }
                if strategy.backend().is_gpu() {
                    warn!(
                        function = %plan.qualified_name,
                        backend = %strategy.backend(),
                        "kernel has no user-context parameter; the runtime will not see the host stream"
                    );
                }
            }
            plans.push(plan);
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = plans.iter().find(|p| !seen.insert(p.qualified_name.as_str())) {
            return Err(CodegenError::InvalidSchema(format!(
                "function `{}` is declared twice",
                dup.qualified_name
            )));
        }
        Ok(plans)
    }

    /// Produce the complete wrapper source, or an error and no source at all.
    pub fn generate(&self, signatures: &[FunctionSignature]) -> Result<String> {
        let _span = perf_span!("generate_wrappers", backend = self.target.backend().name());
        let start = std::time::Instant::now();

        let plans = self.plan(signatures)?;
        let strategy = self.strategy();

        let mut out = CodeEmitter::new();
        self.emit_preamble(&mut out, strategy);
        if self.options.extern_decls {
            emit_extern_decls(&mut out, &plans);
        }
        for plan in &plans {
            self.emit_wrapper(&mut out, strategy, plan);
        }

        let source = out.finish();
        info!(
            target_string = %self.target,
            wrappers = plans.len(),
            bytes = source.len(),
            "generated wrapper source"
        );
        torchbridge_tracing::performance::record_generation(
            self.target.backend().name(),
            plans.len(),
            source.len(),
            start.elapsed().as_micros() as u64,
        );
        Ok(source)
    }

    fn emit_preamble(&self, out: &mut CodeEmitter, strategy: &dyn BackendStrategy) {
        out.line(format!("// Kernel wrappers for target {}.", self.target));
        out.line("// Generated by torchbridge-codegen; do not edit.");
        out.blank();
        for include in strategy.includes() {
            out.line(format!("#include {include}"));
        }
        out.line("#include \"HalideBuffer.h\"");
        out.line("#include \"HalidePyTorchHelpers.h\"");
        out.blank();
    }

    fn emit_wrapper(&self, out: &mut CodeEmitter, strategy: &dyn BackendStrategy, plan: &WrapperPlan) {
        debug!(
            function = %plan.qualified_name,
            backend = %strategy.backend(),
            buffers = plan.buffers().count(),
            "emitting wrapper"
        );

        open_namespaces(out, &plan.namespaces);

        let params: Vec<String> = plan.public_params().map(PlannedArg::wrapper_param).collect();
        out.line("HALIDE_FUNCTION_ATTRS");
        out.line(format!("inline int {}({}) {{", plan.wrapper_name(), params.join(", ")));
        out.indent();

        strategy.emit_context_setup(out);

        let buffers: Vec<&PlannedArg> = plan.buffers().collect();
        if !buffers.is_empty() {
            // Every contiguity check precedes every residency check.
            out.line("// Check tensors have contiguous memory and are on the correct device");
            for buffer in &buffers {
                out.line(format!("HLPT_CHECK_CONTIGUOUS({});", buffer.name));
            }
            for buffer in &buffers {
                strategy.emit_residency_check(out, buffer);
            }
            out.blank();

            out.line("// Wrap tensors in Halide buffers");
            for buffer in &buffers {
                out.line(format!(
                    "Halide::Runtime::Buffer<{}> {} = {};",
                    buffer.element_c_type(),
                    buffer.view_name(),
                    strategy.wrap_expression(buffer)
                ));
            }
            out.blank();
        }

        out.line("// Run Halide pipeline");
        let call_args: Vec<String> = plan.args.iter().map(PlannedArg::call_arg).collect();
        out.line(format!(
            "int {STATUS_LOCAL} = {}({});",
            plan.simple_name,
            call_args.join(", ")
        ));
        out.blank();
        out.line(format!("AT_ASSERTM({STATUS_LOCAL} == 0, \"Halide call failed\");"));

        strategy.emit_post_checks(out, &buffers);

        if self.options.flush_cache {
            out.line("// Flush cache");
            out.line(format!("{}({});", CACHE_CLEANUP_FN, strategy.cache_flush_argument()));
        }

        out.line("return 0;");
        out.dedent();
        out.line("}");
        out.blank();

        close_namespaces(out, &plan.namespaces);
    }
}

fn open_namespaces(out: &mut CodeEmitter, namespaces: &[String]) {
    if namespaces.is_empty() {
        return;
    }
    for ns in namespaces {
        out.line(format!("namespace {ns} {{"));
    }
    out.blank();
}

fn close_namespaces(out: &mut CodeEmitter, namespaces: &[String]) {
    if namespaces.is_empty() {
        return;
    }
    for ns in namespaces.iter().rev() {
        out.line(format!("}}  // namespace {ns}"));
    }
    out.blank();
}

/// Forward declarations of the kernel entry points, mirroring the kernel's
/// own header: C linkage at global scope, C++ linkage inside namespaces.
fn emit_extern_decls(out: &mut CodeEmitter, plans: &[WrapperPlan]) {
    let decl = |plan: &WrapperPlan| {
        let params: Vec<String> = plan.args.iter().map(PlannedArg::extern_param).collect();
        format!("int {}({});", plan.simple_name, params.join(", "))
    };

    let (global, namespaced): (Vec<&WrapperPlan>, Vec<&WrapperPlan>) =
        plans.iter().partition(|p| p.namespaces.is_empty());

    if !global.is_empty() {
        out.line("extern \"C\" {");
        for plan in global {
            out.line("HALIDE_FUNCTION_ATTRS");
            out.line(decl(plan));
        }
        out.line("}  // extern \"C\"");
        out.blank();
    }

    for plan in namespaced {
        for ns in &plan.namespaces {
            out.line(format!("namespace {ns} {{"));
        }
        out.line("HALIDE_FUNCTION_ATTRS");
        out.line(decl(plan));
        for ns in plan.namespaces.iter().rev() {
            out.line(format!("}}  // namespace {ns}"));
        }
        out.blank();
    }
}

/// Generate wrapper source for `signatures` on `target`.
pub fn generate(signatures: &[FunctionSignature], target: &Target, options: GeneratorOptions) -> Result<String> {
    WrapperGenerator::new(target.clone(), options).generate(signatures)
}
